use axum::http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::filter::FieldFilter;
use crate::types::Method;

/// Normalized request handed through the dispatch pipeline.
///
/// Created once per inbound request; only the pipeline mutates it.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective method; dispatch replaces it when a `method` query arg overrides it
    pub method: Method,
    pub url_path: String,
    pub headers: HeaderMap,
    /// Object, or sequence of objects for bulk writes
    pub form_data: Value,
    pub args: HashMap<String, Vec<String>>,
    pub raw_args: HashMap<String, String>,
    pub session: Option<Map<String, Value>>,
    /// Set by token authentication
    pub payload: Option<Value>,
    /// A single-row path parameter was supplied
    pub has_param: bool,
    path_params: Map<String, Value>,
    filter: Option<Arc<FieldFilter>>,
}

impl Context {
    pub fn builder(method: Method, url_path: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(method, url_path)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a multi-valued query arg
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn path_params(&self) -> &Map<String, Value> {
        &self.path_params
    }

    /// Field filter attached during dispatch; everything passes before that
    pub fn filter(&self) -> Arc<FieldFilter> {
        self.filter.clone().unwrap_or_default()
    }

    pub fn set_filter(&mut self, filter: Arc<FieldFilter>) {
        self.filter = Some(filter);
    }

    /// Path params go into `where` for every method but delete, which
    /// takes them directly as its predicate.
    pub(crate) fn merge_path_params(&mut self) {
        if self.path_params.is_empty() {
            return;
        }
        if self.form_data.is_null() {
            self.form_data = Value::Object(Map::new());
        }
        let params = self.path_params.clone();
        let is_delete = self.method == Method::Delete;
        match &mut self.form_data {
            Value::Object(form) if is_delete => merge_into(form, &params),
            Value::Object(form) => merge_where(form, &params),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Value::Object(form) = item {
                        if is_delete {
                            merge_into(form, &params);
                        } else {
                            merge_where(form, &params);
                        }
                    }
                }
            }
            _ => tracing::debug!("Ignoring path params for non-object form data"),
        }
    }
}

fn merge_into(target: &mut Map<String, Value>, params: &Map<String, Value>) {
    for (k, v) in params {
        target.insert(k.clone(), v.clone());
    }
}

fn merge_where(form: &mut Map<String, Value>, params: &Map<String, Value>) {
    let entry = form.entry("where").or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(filter) = entry {
        merge_into(filter, params);
    }
}

pub struct ContextBuilder {
    method: Method,
    url_path: String,
    headers: HeaderMap,
    form_data: Value,
    path_params: Map<String, Value>,
    args: HashMap<String, Vec<String>>,
    raw_args: HashMap<String, String>,
    session: Option<Map<String, Value>>,
}

impl ContextBuilder {
    pub fn new(method: Method, url_path: impl Into<String>) -> Self {
        Self {
            method,
            url_path: url_path.into(),
            headers: HeaderMap::new(),
            form_data: Value::Null,
            path_params: Map::new(),
            args: HashMap::new(),
            raw_args: HashMap::new(),
            session: None,
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn form_data(mut self, form_data: Value) -> Self {
        self.form_data = form_data;
        self
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn path_params(mut self, params: Map<String, Value>) -> Self {
        self.path_params.extend(params);
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        self.raw_args.entry(name.clone()).or_insert_with(|| value.clone());
        self.args.entry(name).or_default().push(value);
        self
    }

    pub fn args(mut self, args: HashMap<String, Vec<String>>) -> Self {
        self.args = args;
        self
    }

    pub fn raw_args(mut self, raw_args: HashMap<String, String>) -> Self {
        self.raw_args = raw_args;
        self
    }

    pub fn session(mut self, session: Map<String, Value>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn build(self) -> Context {
        let mut ctx = Context {
            method: self.method,
            url_path: self.url_path,
            headers: self.headers,
            form_data: self.form_data,
            args: self.args,
            raw_args: self.raw_args,
            session: self.session,
            payload: None,
            has_param: !self.path_params.is_empty(),
            path_params: self.path_params,
            filter: None,
        };
        ctx.merge_path_params();
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_params_merge_into_where() {
        let ctx = Context::builder(Method::Get, "/user/3").path_param("id", 3).build();
        assert!(ctx.has_param);
        assert_eq!(ctx.form_data, json!({"where": {"id": 3}}));

        let ctx = Context::builder(Method::Put, "/user/3")
            .form_data(json!({"where": {"role_name": "x"}, "values": {"email": "e"}}))
            .path_param("id", 3)
            .build();
        assert_eq!(ctx.form_data["where"], json!({"role_name": "x", "id": 3}));
    }

    #[test]
    fn path_params_merge_into_each_item() {
        let ctx = Context::builder(Method::Patch, "/user/3")
            .form_data(json!([{"values": {"a": 1}}, {"where": {"b": 2}, "values": {"a": 2}}]))
            .path_param("id", 3)
            .build();
        assert_eq!(ctx.form_data[0]["where"], json!({"id": 3}));
        assert_eq!(ctx.form_data[1]["where"], json!({"b": 2, "id": 3}));
    }

    #[test]
    fn delete_takes_path_params_directly() {
        let ctx = Context::builder(Method::Delete, "/user/3").path_param("id", 3).build();
        assert_eq!(ctx.form_data, json!({"id": 3}));
    }

    #[test]
    fn no_params_leaves_form_untouched() {
        let ctx = Context::builder(Method::Post, "/user").form_data(json!({"account": "a"})).build();
        assert!(!ctx.has_param);
        assert_eq!(ctx.form_data, json!({"account": "a"}));
    }

    #[test]
    fn args_keep_all_values() {
        let ctx = Context::builder(Method::Get, "/user").arg("order", "a").arg("order", "b").build();
        assert_eq!(ctx.args["order"], vec!["a", "b"]);
        assert_eq!(ctx.raw_args["order"], "a");
        assert_eq!(ctx.arg("order"), Some("a"));
    }

    #[test]
    fn filter_defaults_to_allow_all() {
        let ctx = Context::builder(Method::Get, "/user").build();
        assert!(ctx.filter().allows("anything"));
    }
}
