use async_trait::async_trait;
use std::sync::Arc;

use super::context::Context;
use super::response::Reply;
use super::View;
use crate::error::ApiError;
use crate::types::Operation;

/// One filter in the dispatch chain.
///
/// A stage either answers the request itself (short-circuit) or calls
/// `next.run(ctx)` to hand it on. Effects on `ctx` are visible to every
/// later stage and to the terminal handler.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name for logging and debugging
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Reply, ApiError>;
}

pub type StageBox = Arc<dyn Stage>;

/// What the terminal handler produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Execute,
    /// Render statements without running them
    Compile,
}

/// Continuation over the remaining stages, ending in the terminal handler
pub struct Next<'a> {
    stages: &'a [StageBox],
    view: &'a View,
    operation: Operation,
    mode: Mode,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [StageBox], view: &'a View, operation: Operation, mode: Mode) -> Self {
        Self { stages, view, operation, mode }
    }

    pub async fn run(self, ctx: &mut Context) -> Result<Reply, ApiError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                tracing::debug!("Running stage '{}' for {} {}", stage.name(), ctx.method, ctx.url_path);
                let next = Next { stages: rest, ..self };
                stage.handle(ctx, next).await
            }
            None => self.view.terminal(self.operation, ctx, self.mode).await,
        }
    }
}
