use serde_json::{Map, Value};

use super::error::FilterError;
use super::keys::FieldFilter;
use super::types::{ColumnRef, Expr};
use crate::database::schema::Table;

/// Stand-in for the column inside function `args`
pub const COLUMN_TOKEN: &str = "$column";

/// SQL functions a projection may call
const FUNCTIONS: &[&str] = &[
    "abs", "avg", "coalesce", "count", "date", "length", "lower", "max", "min", "round", "substr",
    "sum", "trim", "upper",
];

pub fn is_known_function(name: &str) -> bool {
    FUNCTIONS.contains(&name.to_ascii_lowercase().as_str())
}

/// Projection (`keys`) compilation
pub struct FilterSelect<'a> {
    table: &'a Table,
    keys: &'a FieldFilter,
}

impl<'a> FilterSelect<'a> {
    pub fn new(table: &'a Table, keys: &'a FieldFilter) -> Self {
        Self { table, keys }
    }

    /// Falls back to every visible column when the spec is absent or
    /// resolves to nothing; errors only if no column is visible at all.
    pub fn compile(&self, spec: Option<&Value>) -> Result<Vec<Expr>, FilterError> {
        let selected = match spec {
            Some(Value::Array(items)) => self.compile_sequence(items),
            Some(Value::Object(map)) => self.compile_mapping(map),
            Some(Value::String(s)) => {
                let names: Vec<Value> = s.split(',').map(|n| Value::String(n.trim().to_string())).collect();
                self.compile_sequence(&names)
            }
            _ => vec![],
        };
        if !selected.is_empty() {
            return Ok(selected);
        }
        let all: Vec<Expr> = self
            .table
            .columns
            .iter()
            .filter(|c| self.keys.allows(&c.name))
            .map(|c| Expr::Column(ColumnRef::new(&self.table.name, &c.name)))
            .collect();
        if all.is_empty() {
            return Err(FilterError::EmptyProjection);
        }
        Ok(all)
    }

    fn visible(&self, name: &str) -> Option<ColumnRef> {
        if !self.keys.allows(name) {
            return None;
        }
        self.table.column_ref(name)
    }

    fn compile_sequence(&self, items: &[Value]) -> Vec<Expr> {
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => self.visible(name).map(Expr::Column),
                Value::Object(desc) => {
                    let column = self.visible(desc.get("column")?.as_str()?)?;
                    function_term(&column, item)
                }
                _ => None,
            })
            .collect()
    }

    fn compile_mapping(&self, map: &Map<String, Value>) -> Vec<Expr> {
        map.iter()
            .filter_map(|(name, desc)| {
                let column = self.visible(name)?;
                function_term(&column, desc)
            })
            .collect()
    }
}

/// `"lower"` or `{func, args?, label?}` applied to `column`.
/// Unlabelled calls are labelled with the column name.
fn function_term(column: &ColumnRef, desc: &Value) -> Option<Expr> {
    let (func, args, label) = match desc {
        Value::String(func) => (func.as_str(), None, None),
        Value::Object(obj) => (
            obj.get("func")?.as_str()?,
            obj.get("args"),
            obj.get("label").and_then(Value::as_str),
        ),
        _ => return None,
    };
    if !is_known_function(func) {
        tracing::debug!("Dropping projection of {}: unknown function {}", column.name, func);
        return None;
    }
    let args = match args {
        None | Some(Value::Null) => vec![Expr::Column(column.clone())],
        Some(Value::Array(values)) => values.iter().map(|v| argument(column, v)).collect(),
        Some(single) => vec![argument(column, single)],
    };
    let call = Expr::Function { name: func.to_ascii_lowercase(), args };
    Some(Expr::Label { expr: Box::new(call), alias: label.unwrap_or(&column.name).to_string() })
}

fn argument(column: &ColumnRef, value: &Value) -> Expr {
    match value {
        Value::String(s) if s == COLUMN_TOKEN => Expr::Column(column.clone()),
        other => Expr::Literal(other.clone()),
    }
}
