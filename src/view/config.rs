use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::pipeline::StageBox;
use super::stages::StampField;
use crate::auth::{BasicAuth, TokenAuth};
use crate::database::{Storage, Table};
use crate::filter::{CompileOptions, FieldFilter, FilterKeyConfig};
use crate::types::Method;

/// Immutable configuration of one entity view
#[derive(Clone)]
pub struct ViewConfig {
    pub table: Table,
    /// `None` answers every method
    pub methods: Option<Vec<Method>>,
    pub filter_keys: Option<FilterKeyConfig>,
    pub auth: Option<StageBox>,
    pub stages: HashMap<Method, Vec<StageBox>>,
    pub options: CompileOptions,
    /// Let a delete without any predicate clear the table
    pub allow_full_delete: bool,
}

impl ViewConfig {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            methods: None,
            filter_keys: None,
            auth: None,
            stages: HashMap::new(),
            options: CompileOptions::default(),
            allow_full_delete: false,
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    pub fn filter_keys(mut self, filter_keys: FilterKeyConfig) -> Self {
        self.filter_keys = Some(filter_keys);
        self
    }

    pub fn auth(mut self, stage: StageBox) -> Self {
        self.auth = Some(stage);
        self
    }

    /// Runs after authentication, only for `method`
    pub fn stage(mut self, method: Method, stage: StageBox) -> Self {
        self.stages.entry(method).or_default().push(stage);
        self
    }

    pub fn options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn allow_full_delete(mut self, allow: bool) -> Self {
        self.allow_full_delete = allow;
        self
    }

    pub fn allows_method(&self, method: Method) -> bool {
        self.methods.as_ref().map_or(true, |m| m.contains(&method))
    }

    pub fn resolve_filter(&self, method: Method) -> FieldFilter {
        self.filter_keys.as_ref().map(|k| k.resolve(method)).unwrap_or_default()
    }
}

impl std::fmt::Debug for ViewConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewConfig")
            .field("table", &self.table.name)
            .field("methods", &self.methods)
            .field("filter_keys", &self.filter_keys)
            .field("auth", &self.auth.as_ref().map(|s| s.name().to_string()))
            .field("stages", &self.stages.iter().map(|(m, s)| (*m, s.len())).collect::<HashMap<_, _>>())
            .field("options", &self.options)
            .field("allow_full_delete", &self.allow_full_delete)
            .finish()
    }
}

/// Authentication as declared in a views file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthDecl {
    Basic {
        /// Declared table holding the credentials
        table: String,
        #[serde(default)]
        name_key: Option<String>,
        #[serde(default)]
        pwd_key: Option<String>,
    },
    Token {
        /// Falls back to the process JWT secret
        #[serde(default)]
        secret: Option<String>,
    },
}

/// One view as declared in a views file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDecl {
    pub table: Table,
    #[serde(default)]
    pub methods: Option<Vec<Method>>,
    #[serde(default)]
    pub filter_keys: Option<FilterKeyConfig>,
    #[serde(default)]
    pub auth: Option<AuthDecl>,
    /// Field stamped with the current unix time on post
    #[serde(default)]
    pub stamp_on_post: Option<String>,
    #[serde(default)]
    pub options: Option<CompileOptions>,
    #[serde(default)]
    pub allow_full_delete: bool,
}

/// Top-level views file: `views: [...]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewsFile {
    pub views: Vec<ViewDecl>,
}

impl ViewsFile {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

impl ViewDecl {
    /// `tables` resolves the credential table of basic auth; `defaults`
    /// supplies options the declaration leaves out.
    pub fn into_config(
        self,
        storage: Arc<dyn Storage>,
        tables: &[Table],
        defaults: &CompileOptions,
        jwt_secret: &str,
    ) -> Result<ViewConfig, String> {
        let mut config = ViewConfig::new(self.table)
            .options(self.options.unwrap_or_else(|| defaults.clone()))
            .allow_full_delete(self.allow_full_delete);
        config.methods = self.methods;
        config.filter_keys = self.filter_keys;

        match self.auth {
            Some(AuthDecl::Basic { table, name_key, pwd_key }) => {
                let auth_table = tables
                    .iter()
                    .find(|t| t.name == table)
                    .cloned()
                    .ok_or_else(|| format!("basic auth table {} is not declared", table))?;
                let mut stage = BasicAuth::new(storage, auth_table);
                if let Some(key) = name_key {
                    stage = stage.name_key(key);
                }
                if let Some(key) = pwd_key {
                    stage = stage.pwd_key(key);
                }
                config = config.auth(Arc::new(stage));
            }
            Some(AuthDecl::Token { secret }) => {
                let secret = secret.unwrap_or_else(|| jwt_secret.to_string());
                config = config.auth(Arc::new(TokenAuth::jwt(secret)));
            }
            None => {}
        }
        if let Some(field) = self.stamp_on_post {
            config = config.stage(Method::Post, Arc::new(StampField::new(field)));
        }
        Ok(config)
    }
}
