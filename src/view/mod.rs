pub mod cache;
pub mod config;
pub mod context;
pub mod handlers;
pub mod pipeline;
pub mod response;
pub mod stages;

pub use cache::FilterCache;
pub use config::{AuthDecl, ViewConfig, ViewDecl, ViewsFile};
pub use context::{Context, ContextBuilder};
pub use pipeline::{Mode, Next, Stage, StageBox};
pub use response::{Envelope, Meta, PageMeta, Reply};
pub use stages::StampField;

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::database::Storage;
use crate::error::ApiError;
use crate::filter::{FieldFilter, FilterError};
use crate::types::{Method, Operation};

/// Query-arg keys decoded as JSON into the form data of a `get`
pub const QUERY_ARGS: [&str; 5] = ["keys", "where", "limit", "order", "group"];

/// Which dispatch checks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checks {
    method: bool,
    stages: bool,
    keys: bool,
}

impl Checks {
    const ALL: Checks = Checks { method: true, stages: true, keys: true };
    const NONE: Checks = Checks { method: false, stages: false, keys: false };
}

/// CRUD endpoints over one table
pub struct View {
    name: String,
    config: ViewConfig,
    storage: Arc<dyn Storage>,
    handlers: HashMap<Method, Operation>,
    cache: FilterCache,
}

impl View {
    pub fn new(config: ViewConfig, storage: Arc<dyn Storage>) -> Result<Self, FilterError> {
        config.table.validate()?;
        let handlers = Method::ALL.iter().map(|m| (*m, Operation::for_method(*m))).collect();
        Ok(Self {
            name: config.table.name.clone(),
            config,
            storage,
            handlers,
            cache: FilterCache::new(),
        })
    }

    /// Route segment; the table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn cache(&self) -> &FilterCache {
        &self.cache
    }

    /// Full pipeline: method allow-list, stages and field filters
    pub async fn dispatch(&self, ctx: Context) -> Reply {
        self.dispatch_with(ctx, Checks::ALL, Mode::Execute).await
    }

    /// Terminal handler only; skips every check
    pub async fn raw_dispatch(&self, ctx: Context) -> Reply {
        self.dispatch_with(ctx, Checks::NONE, Mode::Execute).await
    }

    /// Full pipeline, but the handler returns its rendered statements
    pub async fn compile(&self, ctx: Context) -> Reply {
        self.dispatch_with(ctx, Checks::ALL, Mode::Compile).await
    }

    async fn dispatch_with(&self, mut ctx: Context, checks: Checks, mode: Mode) -> Reply {
        let method = match ctx.arg("method") {
            Some(name) => name.parse::<Method>().ok(),
            None => Some(ctx.method),
        };
        let Some(method) = method else {
            tracing::debug!("Unsupported method override on {}", ctx.url_path);
            return ApiError::MethodNotAllowed.into_envelope().into();
        };
        ctx.method = method;
        // an override changes where path params belong
        ctx.merge_path_params();
        if method == Method::Get {
            decode_query_args(&mut ctx);
        }

        if checks.method && !self.config.allows_method(method) {
            return ApiError::MethodNotAllowed.into_envelope().into();
        }
        let Some(&operation) = self.handlers.get(&method) else {
            return ApiError::MethodNotAllowed.into_envelope().into();
        };

        let filter = if checks.keys {
            self.cache.get_or_resolve(method, || self.config.resolve_filter(method)).await
        } else {
            Arc::new(FieldFilter::allow_all())
        };
        ctx.set_filter(filter);

        let mut chain: Vec<StageBox> = Vec::new();
        if checks.stages {
            chain.extend(self.config.auth.iter().cloned());
            if let Some(stages) = self.config.stages.get(&method) {
                chain.extend(stages.iter().cloned());
            }
        }

        let next = Next::new(&chain, self, operation, mode);
        match AssertUnwindSafe(next.run(&mut ctx)).catch_unwind().await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                if err.status_code() >= 500 {
                    tracing::error!("{} {} failed: {}", method, ctx.url_path, err);
                }
                err.into_envelope().into()
            }
            Err(panic) => {
                let text = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "stage panicked".to_string());
                tracing::error!("{} {} panicked: {}", method, ctx.url_path, text);
                ApiError::internal_server_error(text).into_envelope().into()
            }
        }
    }
}

/// Malformed values are skipped; each key is decoded on its own
fn decode_query_args(ctx: &mut Context) {
    let mut decoded = Vec::new();
    for key in QUERY_ARGS {
        let Some(raw) = ctx.arg(key) else { continue };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => decoded.push((key, value)),
            Err(e) => tracing::debug!("Ignoring malformed query arg {}: {}", key, e),
        }
    }
    if decoded.is_empty() {
        return;
    }
    if !ctx.form_data.is_object() {
        ctx.form_data = serde_json::Value::Object(Default::default());
    }
    if let Some(form) = ctx.form_data.as_object_mut() {
        for (key, value) in decoded {
            form.insert(key.to_string(), value);
        }
    }
    // a decoded `where` must not drop the single-row path filter
    ctx.merge_path_params();
}
