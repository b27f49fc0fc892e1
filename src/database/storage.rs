use async_trait::async_trait;
use serde_json::{Map, Value};

use super::manager::DatabaseError;
use super::render::Dialect;
use crate::filter::SqlResult;

pub type JsonRow = Map<String, Value>;

/// Result of an insert: affected rows and, when known, the last generated key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertOutcome {
    pub count: u64,
    pub rowid: Option<i64>,
}

/// Statement execution contract the views run against
#[async_trait]
pub trait Storage: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Round trip to the engine
    async fn health_check(&self) -> Result<(), DatabaseError>;

    async fn fetch_all(&self, sql: &SqlResult) -> Result<Vec<JsonRow>, DatabaseError>;

    async fn fetch_optional(&self, sql: &SqlResult) -> Result<Option<JsonRow>, DatabaseError>;

    /// Rows affected
    async fn execute(&self, sql: &SqlResult) -> Result<u64, DatabaseError>;

    async fn execute_insert(&self, sql: &SqlResult) -> Result<InsertOutcome, DatabaseError>;

    /// All statements in one transaction; rows affected summed
    async fn execute_batch(&self, sqls: &[SqlResult]) -> Result<u64, DatabaseError>;
}
