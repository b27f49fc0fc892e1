use async_trait::async_trait;
use serde_json::Value;

use super::context::Context;
use super::pipeline::{Next, Stage};
use super::response::Reply;
use crate::error::ApiError;

/// Sets a field to the current unix time on every posted row
pub struct StampField {
    field: String,
}

impl StampField {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }

    pub fn create_time() -> Self {
        Self::new("create_time")
    }
}

#[async_trait]
impl Stage for StampField {
    fn name(&self) -> &str {
        "stamp_field"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<Reply, ApiError> {
        let now = Value::from(chrono::Utc::now().timestamp());
        match &mut ctx.form_data {
            Value::Object(row) => {
                row.insert(self.field.clone(), now);
            }
            Value::Array(rows) => {
                for row in rows.iter_mut().filter_map(Value::as_object_mut) {
                    row.insert(self.field.clone(), now.clone());
                }
            }
            _ => {}
        }
        next.run(ctx).await
    }
}
