//! axum adapter: turns HTTP requests into `Context`s and `Reply`s into responses

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method as HttpMethod, Uri},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::database::Storage;
use crate::error::ApiError;
use crate::types::Method;
use crate::view::{Context, Envelope, View};

#[derive(Clone)]
pub struct AppState {
    views: Arc<HashMap<String, Arc<View>>>,
    storage: Arc<dyn Storage>,
}

impl AppState {
    pub fn new(views: Vec<Arc<View>>, storage: Arc<dyn Storage>) -> Self {
        let views = views.into_iter().map(|v| (v.name().to_string(), v)).collect();
        Self { views: Arc::new(views), storage }
    }

    pub fn view(&self, name: &str) -> Option<&Arc<View>> {
        self.views.get(name)
    }
}

/// `/health`, `/{view}` and `/{view}/:id` for every registered view
pub fn router(views: Vec<Arc<View>>, storage: Arc<dyn Storage>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/:view", any(collection))
        .route("/:view/:id", any(single))
        .with_state(AppState::new(views, storage))
}

async fn collection(
    State(state): State<AppState>,
    Path(view): Path<String>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    dispatch(&state, &view, None, method, uri, headers, query, body).await
}

async fn single(
    State(state): State<AppState>,
    Path((view, id)): Path<(String, String)>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    dispatch(&state, &view, Some(id), method, uri, headers, query, body).await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &AppState,
    name: &str,
    id: Option<String>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let Some(view) = state.view(name) else {
        return Envelope::new(404, "Not Found").into_response();
    };
    let Ok(method) = method.as_str().parse::<Method>() else {
        return ApiError::MethodNotAllowed.into_response();
    };
    let form_data = match parse_body(&body) {
        Ok(value) => value,
        Err(e) => return ApiError::bad_request(format!("Invalid JSON body: {}", e)).into_response(),
    };
    let (args, raw_args) = parse_query(query.as_deref().unwrap_or_default());

    let mut builder = Context::builder(method, uri.path())
        .headers(headers)
        .form_data(form_data)
        .args(args)
        .raw_args(raw_args);
    if let Some(id) = id {
        let key = view.config().table.key_column().map(|c| c.name.clone()).unwrap_or_else(|| "id".into());
        builder = builder.path_param(key, path_value(&id));
    }

    view.dispatch(builder.build()).await.into_response()
}

fn parse_body(body: &Bytes) -> Result<Value, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
}

/// Multi-valued args plus the first value of each
pub fn parse_query(query: &str) -> (HashMap<String, Vec<String>>, HashMap<String, String>) {
    let mut args: HashMap<String, Vec<String>> = HashMap::new();
    let mut raw_args = HashMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        raw_args.entry(k.to_string()).or_insert_with(|| v.to_string());
        args.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    (args, raw_args)
}

/// Numeric ids compare as numbers
fn path_value(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::String(id.to_string()))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    match state.storage.health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            Json(json!({
                "status": 200,
                "message": "ok",
                "data": {"timestamp": now, "database": "ok", "views": state.views.keys().collect::<Vec<_>>()}
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": 503,
                "message": "database unavailable",
                "data": {"timestamp": now, "database_error": e.to_string()}
            })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_and_unknown_views() {
        let database = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let app = router(vec![], database);

        let (status, body) = call(app.clone(), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["database"], "ok");

        let (status, body) = call(app, "GET", "/missing/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"status": 404, "message": "Not Found"}));
    }

    #[test]
    fn query_args_keep_every_value() {
        let (args, raw) = parse_query("order=%5B%22-id%22%5D&tag=a&tag=b");
        assert_eq!(args["order"], vec!["[\"-id\"]"]);
        assert_eq!(args["tag"], vec!["a", "b"]);
        assert_eq!(raw["tag"], "a");
    }

    #[test]
    fn path_values() {
        assert_eq!(path_value("12"), json!(12));
        assert_eq!(path_value("abc"), json!("abc"));
    }

    #[test]
    fn empty_bodies_are_null() {
        assert_eq!(parse_body(&Bytes::from_static(b"")).unwrap(), Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(b"  \n")).unwrap(), Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(b"{\"a\":1}")).unwrap(), json!({"a": 1}));
        assert!(parse_body(&Bytes::from_static(b"{")).is_err());
    }
}
