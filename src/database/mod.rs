pub mod dynamic;
pub mod manager;
pub mod render;
pub mod schema;
pub mod statement;
pub mod storage;

pub use manager::{Database, DatabaseError};
pub use render::{render, Dialect};
pub use schema::{Column, ColumnType, Table};
pub use statement::{
    BindParams, Delete, Insert, Pagination, Select, SelectPlan, SelectQuery, Statement, StatementBuilder, Update,
};
pub use storage::{InsertOutcome, JsonRow, Storage};
