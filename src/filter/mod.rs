pub mod error;
pub mod filter_order;
pub mod filter_select;
pub mod filter_where;
pub mod keys;
pub mod types;

pub use error::FilterError;
pub use filter_order::FilterOrder;
pub use filter_select::FilterSelect;
pub use filter_where::FilterWhere;
pub use keys::{FieldFilter, FilterKeyConfig, KeyLists};
pub use types::*;

use serde_json::Value;

use crate::database::schema::Table;

pub fn compile_where(table: &Table, descriptor: &Value, keys: &FieldFilter, options: &CompileOptions) -> Option<Expr> {
    FilterWhere::new(table, keys, options).compile(descriptor)
}

pub fn compile_projection(table: &Table, spec: Option<&Value>, keys: &FieldFilter) -> Result<Vec<Expr>, FilterError> {
    FilterSelect::new(table, keys).compile(spec)
}

pub fn compile_order(table: &Table, spec: &Value, keys: &FieldFilter) -> Option<Vec<Expr>> {
    FilterOrder::new(table, keys).compile_order(spec)
}

pub fn compile_group(table: &Table, spec: &Value, keys: &FieldFilter) -> Option<Vec<Expr>> {
    FilterOrder::new(table, keys).compile_group(spec)
}
