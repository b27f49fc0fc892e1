use serde_json::{Map, Value};

use super::schema::Table;
use crate::filter::{
    compile_group, compile_order, compile_projection, compile_where, ArithOp, CompileOptions, Expr, FieldFilter,
    FilterError,
};

/// Caller-supplied values for named placeholders
pub type BindParams = Map<String, Value>;

/// Label of the aggregate in a companion count statement
pub const COUNT_LABEL: &str = "_count";

const BIND_PREFIX: &str = "$bind.";
const INCR_PREFIX: &str = "$incr.";

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<Expr>,
    pub filter: Option<Expr>,
    pub group: Option<Vec<Expr>>,
    pub order: Option<Vec<Expr>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Structural key, used to return generated ids where the dialect needs it
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub filter: Option<Expr>,
    /// One execution per entry; empty means a single execution without binds
    pub binds: Vec<BindParams>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

/// `(offset, limit)` window of a select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    /// `[offset, limit]` or a bare `limit`; anything else is ignored
    pub fn from_value(value: &Value, max_limit: Option<u64>) -> Option<Self> {
        let (offset, limit) = match value {
            Value::Array(pair) if pair.len() == 2 => (pair[0].as_u64()?, pair[1].as_u64()?),
            Value::Array(single) if single.len() == 1 => (0, single[0].as_u64()?),
            other => (0, other.as_u64()?),
        };
        let limit = match max_limit {
            Some(max) if limit > max => {
                tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max);
                max
            }
            _ => limit,
        };
        Some(Self { offset, limit })
    }
}

/// The `get` handler's inputs, lifted from form data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub keys: Option<Value>,
    pub filter: Option<Value>,
    pub order: Option<Value>,
    pub group: Option<Value>,
    pub limit: Option<Pagination>,
    /// Build a companion count statement when a window is requested
    pub paginate: bool,
}

impl SelectQuery {
    pub fn from_form(form: &Value, max_limit: Option<u64>) -> Self {
        let field = |name: &str| form.get(name).filter(|v| !v.is_null()).cloned();
        Self {
            keys: field("keys"),
            filter: field("where"),
            order: field("order"),
            group: field("group"),
            limit: form.get("limit").and_then(|v| Pagination::from_value(v, max_limit)),
            paginate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectPlan {
    Single(Select),
    Paged { data: Select, count: Select, pagination: Pagination },
}

/// Assembles statements for one table under one field filter
pub struct StatementBuilder<'a> {
    table: &'a Table,
    keys: &'a FieldFilter,
    options: &'a CompileOptions,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(table: &'a Table, keys: &'a FieldFilter, options: &'a CompileOptions) -> Self {
        Self { table, keys, options }
    }

    fn filter(&self, descriptor: Option<&Value>) -> Option<Expr> {
        descriptor.and_then(|d| compile_where(self.table, d, self.keys, self.options))
    }

    pub fn select(&self, query: &SelectQuery) -> Result<SelectPlan, FilterError> {
        let filter = self.filter(query.filter.as_ref());
        let mut data = Select {
            table: self.table.name.clone(),
            columns: compile_projection(self.table, query.keys.as_ref(), self.keys)?,
            filter,
            group: query.group.as_ref().and_then(|g| compile_group(self.table, g, self.keys)),
            order: query.order.as_ref().and_then(|o| compile_order(self.table, o, self.keys)),
            limit: None,
            offset: None,
        };
        let Some(pagination) = query.limit else {
            return Ok(SelectPlan::Single(data));
        };
        data.limit = Some(pagination.limit);
        data.offset = Some(pagination.offset);
        if !query.paginate {
            return Ok(SelectPlan::Single(data));
        }
        let count = self.count(data.filter.clone())?;
        Ok(SelectPlan::Paged { data, count, pagination })
    }

    fn count(&self, filter: Option<Expr>) -> Result<Select, FilterError> {
        let key = self
            .table
            .key_column()
            .ok_or_else(|| FilterError::InvalidData(format!("table {} has no columns", self.table.name)))?;
        let call = Expr::Function {
            name: "count".into(),
            args: vec![Expr::Column(crate::filter::ColumnRef::new(&self.table.name, &key.name))],
        };
        Ok(Select {
            table: self.table.name.clone(),
            columns: vec![Expr::Label { expr: Box::new(call), alias: COUNT_LABEL.into() }],
            filter,
            group: None,
            order: None,
            limit: None,
            offset: None,
        })
    }

    /// Object or sequence of objects. Columns are the union of the visible
    /// keys across rows, in first-seen order; absent values are NULL.
    pub fn insert(&self, data: &Value) -> Result<Insert, FilterError> {
        let rows: Vec<&Map<String, Value>> = match data {
            Value::Object(row) => vec![row],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| FilterError::InvalidData("insert rows must be objects".into()))
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(FilterError::InvalidData("insert data must be an object or a list".into())),
        };

        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if self.keys.allows(key) && self.table.get(key).is_some() && !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        if rows.is_empty() || columns.is_empty() {
            return Err(FilterError::EmptyInsert);
        }

        let values = rows
            .iter()
            .map(|row| columns.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect())
            .collect();
        Ok(Insert {
            table: self.table.name.clone(),
            columns,
            rows: values,
            key: self.table.key_column().map(|c| c.name.clone()),
        })
    }

    /// Object or sequence of `{where, values, data?}` items, one statement each
    pub fn update(&self, data: &Value) -> Result<Vec<Update>, FilterError> {
        match data {
            Value::Array(items) => items.iter().map(|item| self.update_item(item)).collect(),
            item @ Value::Object(_) => Ok(vec![self.update_item(item)?]),
            _ => Err(FilterError::InvalidData("update data must be an object or a list".into())),
        }
    }

    fn update_item(&self, item: &Value) -> Result<Update, FilterError> {
        let values = item
            .get("values")
            .and_then(Value::as_object)
            .ok_or(FilterError::EmptyAssignment)?;
        let mut assignments = Vec::new();
        for (name, value) in values {
            if !self.keys.allows(name) {
                continue;
            }
            let Some(column) = self.table.column_ref(name) else {
                continue;
            };
            assignments.push((column.name.clone(), assignment(&column, value)));
        }
        if assignments.is_empty() {
            return Err(FilterError::EmptyAssignment);
        }

        let binds = match item.get("data") {
            None | Some(Value::Null) => vec![],
            Some(Value::Object(params)) => vec![params.clone()],
            Some(Value::Array(sets)) => sets
                .iter()
                .map(|set| {
                    set.as_object()
                        .cloned()
                        .ok_or_else(|| FilterError::InvalidData("update bind sets must be objects".into()))
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(FilterError::InvalidData("update data must be an object or a list".into())),
        };

        Ok(Update {
            table: self.table.name.clone(),
            assignments,
            filter: self.filter(item.get("where")),
            binds,
        })
    }

    /// Unconditional when the descriptor compiles to nothing
    pub fn delete(&self, data: &Value) -> Delete {
        Delete { table: self.table.name.clone(), filter: self.filter(Some(data)) }
    }
}

fn assignment(column: &crate::filter::ColumnRef, value: &Value) -> Expr {
    if let Some(text) = value.as_str() {
        if let Some(name) = text.strip_prefix(BIND_PREFIX) {
            return Expr::placeholder(name);
        }
        if let Some(magnitude) = text.strip_prefix(INCR_PREFIX) {
            if let Ok(n) = magnitude.trim().parse::<i64>() {
                let op = if n < 0 { ArithOp::Sub } else { ArithOp::Add };
                return Expr::Arith {
                    left: Box::new(Expr::Column(column.clone())),
                    op,
                    right: Box::new(Expr::Literal(Value::from(n.unsigned_abs()))),
                };
            }
        }
    }
    Expr::Literal(value.clone())
}
