use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Window reported alongside paginated query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total: u64,
    pub count: u64,
    pub skip: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rowid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PageMeta>,
}

/// Uniform result of every handler and every error path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Envelope {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), data: None, meta: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// What a stage or handler hands back to the transport
#[derive(Debug, Clone)]
pub enum Reply {
    Envelope(Envelope),
    /// Transport-specific override: body, status and extra headers
    Raw { body: Value, status: u16, headers: HeaderMap },
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Reply::Envelope(env) => env.status,
            Reply::Raw { status, .. } => *status,
        }
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Reply::Envelope(env) => Some(env),
            Reply::Raw { .. } => None,
        }
    }

    /// JSON body as the client will see it
    pub fn body(&self) -> Value {
        match self {
            Reply::Envelope(env) => serde_json::to_value(env).unwrap_or_else(|e| {
                tracing::error!("Failed to serialize envelope: {}", e);
                json!({"status": 500, "message": "Failed to serialize response"})
            }),
            Reply::Raw { body, .. } => body.clone(),
        }
    }
}

impl From<Envelope> for Reply {
    fn from(env: Envelope) -> Self {
        Reply::Envelope(env)
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        Reply::Envelope(self).into_response()
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.body();
        match self {
            Reply::Raw { headers, .. } => (status, headers, Json(body)).into_response(),
            Reply::Envelope(_) => (status, Json(body)).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_empty_parts() {
        let body = Reply::from(Envelope::new(405, "Method Not Allowed")).body();
        assert_eq!(body, json!({"status": 405, "message": "Method Not Allowed"}));
    }

    #[test]
    fn pagination_meta_shape() {
        let env = Envelope::new(200, "Query ok!").with_data(json!([])).with_meta(Meta {
            pagination: Some(PageMeta { total: 10, count: 0, skip: 20, limit: 5 }),
            ..Default::default()
        });
        assert_eq!(
            Reply::from(env).body(),
            json!({
                "status": 200,
                "message": "Query ok!",
                "data": [],
                "meta": {"pagination": {"total": 10, "count": 0, "skip": 20, "limit": 5}}
            })
        );
    }

    #[test]
    fn raw_reply_status() {
        let reply = Reply::Raw { body: json!({"ok": true}), status: 202, headers: HeaderMap::new() };
        assert_eq!(reply.status(), 202);
        assert!(reply.envelope().is_none());
        assert_eq!(reply.into_response().status(), StatusCode::ACCEPTED);
    }
}
