use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use thiserror::Error;
use tracing::info;

use super::dynamic::{build_query, row_to_json};
use super::render::Dialect;
use super::schema::Table;
use super::storage::{InsertOutcome, JsonRow, Storage};
use crate::filter::{FilterError, SqlResult};

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Unsupported database driver: {0}")]
    UnsupportedDriver(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Connection pool over the sqlx `Any` driver (SQLite or Postgres)
pub struct Database {
    pool: AnyPool,
    dialect: Dialect,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        Self::connect_with(database_url, 5).await
    }

    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        url::Url::parse(database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        let dialect = Dialect::from_url(database_url)
            .ok_or_else(|| DatabaseError::UnsupportedDriver(scheme_of(database_url)))?;

        sqlx::any::install_default_drivers();
        let options = if is_memory(database_url) {
            // each connection to :memory: is a separate database
            AnyPoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(max_connections)
        };
        let pool = options.connect(database_url).await?;

        info!("Connected {:?} database pool", dialect);
        Ok(Self { pool, dialect })
    }

    pub async fn create_table(&self, table: &Table) -> Result<(), DatabaseError> {
        let ddl = self.dialect.create_table(table)?;
        sqlx::query(&ddl).execute(&self.pool).await?;
        info!("Created table {}", table.name);
        Ok(())
    }

    pub async fn drop_table(&self, table: &Table) -> Result<(), DatabaseError> {
        let ddl = self.dialect.drop_table(table)?;
        sqlx::query(&ddl).execute(&self.pool).await?;
        info!("Dropped table {}", table.name);
        Ok(())
    }

    pub async fn exists_table(&self, table_name: &str) -> Result<bool, DatabaseError> {
        let mut sql = self.dialect.exists_table();
        sql.params.push(table_name.into());
        Ok(self.fetch_optional(&sql).await?.is_some())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database pool");
    }
}

#[async_trait]
impl Storage for Database {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_all(&self, sql: &SqlResult) -> Result<Vec<JsonRow>, DatabaseError> {
        let rows = build_query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn fetch_optional(&self, sql: &SqlResult) -> Result<Option<JsonRow>, DatabaseError> {
        let row = build_query(sql).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(row_to_json))
    }

    async fn execute(&self, sql: &SqlResult) -> Result<u64, DatabaseError> {
        let result = build_query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn execute_insert(&self, sql: &SqlResult) -> Result<InsertOutcome, DatabaseError> {
        match self.dialect {
            Dialect::Postgres => {
                // RETURNING yields one row per inserted key
                let rows = build_query(sql).fetch_all(&self.pool).await?;
                let rowid = rows
                    .last()
                    .map(row_to_json)
                    .and_then(|row| row.values().next().and_then(|v| v.as_i64()));
                Ok(InsertOutcome { count: rows.len() as u64, rowid })
            }
            Dialect::Sqlite => {
                let result = build_query(sql).execute(&self.pool).await?;
                Ok(InsertOutcome { count: result.rows_affected(), rowid: result.last_insert_id() })
            }
        }
    }

    async fn execute_batch(&self, sqls: &[SqlResult]) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for sql in sqls {
            affected += build_query(sql).execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}

fn is_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite") && (database_url.contains(":memory:") || database_url.contains("mode=memory"))
}

fn scheme_of(database_url: &str) -> String {
    database_url.split(':').next().unwrap_or_default().to_string()
}
