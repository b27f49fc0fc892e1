use serde_json::{Map, Value};

use super::keys::FieldFilter;
use super::types::{BoolOp, ColumnRef, CompareOp, CompileOptions, Expr};
use crate::database::schema::Table;

/// Compiles filter descriptors into predicate trees.
///
/// Parsing is tolerant: unknown fields, unknown operators and malformed
/// clauses produce no term instead of an error.
pub struct FilterWhere<'a> {
    table: &'a Table,
    keys: &'a FieldFilter,
    options: &'a CompileOptions,
}

impl<'a> FilterWhere<'a> {
    pub fn new(table: &'a Table, keys: &'a FieldFilter, options: &'a CompileOptions) -> Self {
        Self { table, keys, options }
    }

    /// Top-level descriptor, AND-combined
    pub fn compile(&self, descriptor: &Value) -> Option<Expr> {
        match descriptor {
            Value::Object(obj) => self.compile_object(obj, BoolOp::And),
            _ => None,
        }
    }

    fn compile_object(&self, obj: &Map<String, Value>, op: BoolOp) -> Option<Expr> {
        let mut terms = Vec::new();
        for (key, value) in obj {
            let nested = match key.as_str() {
                "$or" => Some(BoolOp::Or),
                "$and" => Some(BoolOp::And),
                _ => None,
            };
            if let Some(nested_op) = nested {
                if let Value::Object(inner) = value {
                    terms.extend(self.compile_object(inner, nested_op));
                }
                continue;
            }
            if !self.keys.allows(key) {
                continue;
            }
            let Some(column) = self.table.column_ref(key) else {
                continue;
            };
            terms.extend(self.compile_field_value(&column, value));
        }
        Expr::combine(op, terms)
    }

    /// Value attached to a single field name
    pub fn compile_field_value(&self, column: &ColumnRef, value: &Value) -> Option<Expr> {
        match value {
            Value::Array(items) if items.is_empty() => None,
            Value::Array(items) if items[0].is_object() => {
                let terms = items
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|clause| self.compile_clause(column, clause))
                    .collect();
                Expr::and(terms)
            }
            Value::Array(_) => Some(Expr::in_list(Expr::column(column), Expr::Literal(value.clone()), false)),
            Value::Object(clause) => self.compile_clause(column, clause),
            Value::Null => Some(Expr::IsNull { expr: Box::new(Expr::column(column)), negated: false }),
            scalar => Some(Expr::compare(Expr::column(column), CompareOp::Eq, Expr::Literal(scalar.clone()))),
        }
    }

    /// One `{opt, val}` operator clause; `opt` defaults to `$te`
    pub fn compile_clause(&self, column: &ColumnRef, clause: &Map<String, Value>) -> Option<Expr> {
        let opt = operator(clause)?;
        let val = clause.get("val")?;
        match opt {
            "$raw" => self.compile_raw(val),
            "$bind" => self.compile_bind(column, val),
            _ => apply_operator(column, opt, Expr::Literal(val.clone())),
        }
    }

    fn compile_raw(&self, val: &Value) -> Option<Expr> {
        if !self.options.allow_raw {
            tracing::warn!("Dropping $raw clause on table {}: raw predicates are disabled", self.table.name);
            return None;
        }
        let sql = match val {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        tracing::debug!("Injecting raw predicate: {}", sql);
        Some(Expr::Raw(sql))
    }

    fn compile_bind(&self, column: &ColumnRef, val: &Value) -> Option<Expr> {
        match val {
            Value::String(name) => Some(Expr::compare(Expr::column(column), CompareOp::Eq, Expr::placeholder(name))),
            Value::Object(inner) => {
                let opt = operator(inner)?;
                // $bind inside $bind would never terminate
                if opt == "$bind" || opt == "$raw" {
                    return None;
                }
                let name = inner.get("val").and_then(Value::as_str)?;
                let slot = if opt == "$in" || opt == "$nin" {
                    Expr::expanding(name)
                } else {
                    Expr::placeholder(name)
                };
                apply_operator(column, opt, slot)
            }
            _ => None,
        }
    }
}

/// `$te` when `opt` is absent; a present non-string `opt` is unusable
fn operator(clause: &Map<String, Value>) -> Option<&str> {
    match clause.get("opt") {
        None => Some("$te"),
        Some(Value::String(opt)) => Some(opt.as_str()),
        Some(other) => {
            tracing::debug!("Ignoring clause with non-string operator {}", other);
            None
        }
    }
}

fn apply_operator(column: &ColumnRef, opt: &str, operand: Expr) -> Option<Expr> {
    let col = Expr::column(column);
    let is_null = matches!(operand, Expr::Literal(Value::Null));
    let expr = match opt {
        "$te" if is_null => Expr::IsNull { expr: Box::new(col), negated: false },
        "$ne" if is_null => Expr::IsNull { expr: Box::new(col), negated: true },
        "$te" => Expr::compare(col, CompareOp::Eq, operand),
        "$ne" => Expr::compare(col, CompareOp::Ne, operand),
        "$lt" => Expr::compare(col, CompareOp::Lt, operand),
        "$lte" => Expr::compare(col, CompareOp::Lte, operand),
        "$gt" => Expr::compare(col, CompareOp::Gt, operand),
        "$gte" => Expr::compare(col, CompareOp::Gte, operand),
        "$like" => Expr::compare(col, CompareOp::Like, operand),
        "$in" | "$nin" => {
            let set = match operand {
                Expr::Literal(Value::Array(_)) | Expr::Placeholder { .. } => operand,
                Expr::Literal(scalar) => Expr::Literal(Value::Array(vec![scalar])),
                other => other,
            };
            Expr::in_list(col, set, opt == "$nin")
        }
        other => {
            tracing::debug!("Ignoring unknown operator {} on column {}", other, column.name);
            return None;
        }
    };
    Some(expr)
}
