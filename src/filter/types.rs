use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::error::FilterError;

/// A column of a declared table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: String,
    pub name: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self { table: table.into(), name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
}

impl CompareOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            BoolOp::And => " AND ",
            BoolOp::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Expression tree produced by the compiler and consumed by the renderer
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    /// Always sent to the storage engine as a bound parameter
    Literal(Value),
    /// Named slot resolved from caller-supplied bind values at render time
    Placeholder { name: String, expanding: bool },
    /// Injected verbatim
    Raw(String),
    Compare { left: Box<Expr>, op: CompareOp, right: Box<Expr> },
    IsNull { expr: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, set: Box<Expr>, negated: bool },
    Bool { op: BoolOp, terms: Vec<Expr> },
    Arith { left: Box<Expr>, op: ArithOp, right: Box<Expr> },
    Function { name: String, args: Vec<Expr> },
    Label { expr: Box<Expr>, alias: String },
    Sort { expr: Box<Expr>, direction: SortDirection },
}

impl Expr {
    pub fn column(column: &ColumnRef) -> Self {
        Expr::Column(column.clone())
    }

    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Expr::Compare { left: Box::new(left), op, right: Box::new(right) }
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Expr::Placeholder { name: name.into(), expanding: false }
    }

    pub fn expanding(name: impl Into<String>) -> Self {
        Expr::Placeholder { name: name.into(), expanding: true }
    }

    pub fn in_list(expr: Expr, set: Expr, negated: bool) -> Self {
        Expr::InList { expr: Box::new(expr), set: Box::new(set), negated }
    }

    /// 0 terms -> none, 1 -> that term, more -> combined
    pub fn combine(op: BoolOp, mut terms: Vec<Expr>) -> Option<Expr> {
        match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => Some(Expr::Bool { op, terms }),
        }
    }

    pub fn and(terms: Vec<Expr>) -> Option<Expr> {
        Self::combine(BoolOp::And, terms)
    }

    pub fn or(terms: Vec<Expr>) -> Option<Expr> {
        Self::combine(BoolOp::Or, terms)
    }

    /// Walk the tree, delegating identifiers, literals and bind slots to `w`
    pub fn write<W: ExprWriter + ?Sized>(&self, w: &mut W, out: &mut String) -> Result<(), FilterError> {
        match self {
            Expr::Column(c) => out.push_str(&w.ident(&c.name)),
            Expr::Literal(v) => {
                let rendered = w.literal(v)?;
                out.push_str(&rendered);
            }
            Expr::Placeholder { name, expanding } => {
                if *expanding {
                    let slots = w.bind_expanding(name)?;
                    out.push('(');
                    out.push_str(&slots.join(", "));
                    out.push(')');
                } else {
                    let slot = w.bind(name)?;
                    out.push_str(&slot);
                }
            }
            Expr::Raw(sql) => out.push_str(sql),
            Expr::Compare { left, op, right } => {
                left.write(w, out)?;
                out.push(' ');
                out.push_str(op.to_sql());
                out.push(' ');
                right.write(w, out)?;
            }
            Expr::IsNull { expr, negated } => {
                expr.write(w, out)?;
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::InList { expr, set, negated } => {
                let slots = match set.as_ref() {
                    Expr::Literal(Value::Array(items)) => {
                        let mut slots = Vec::with_capacity(items.len());
                        for item in items {
                            slots.push(w.literal(item)?);
                        }
                        slots
                    }
                    Expr::Placeholder { name, expanding: true } => w.bind_expanding(name)?,
                    other => {
                        let mut single = String::new();
                        other.write(w, &mut single)?;
                        vec![single]
                    }
                };
                if slots.is_empty() {
                    // empty membership set: IN is never true, NOT IN always
                    out.push_str(if *negated { "1 = 1" } else { "1 != 1" });
                    return Ok(());
                }
                expr.write(w, out)?;
                out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                out.push_str(&slots.join(", "));
                out.push(')');
            }
            Expr::Bool { op, terms } => {
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        out.push_str(op.to_sql());
                    }
                    if matches!(term, Expr::Bool { .. }) {
                        out.push('(');
                        term.write(w, out)?;
                        out.push(')');
                    } else {
                        term.write(w, out)?;
                    }
                }
            }
            Expr::Arith { left, op, right } => {
                left.write(w, out)?;
                out.push_str(match op {
                    ArithOp::Add => " + ",
                    ArithOp::Sub => " - ",
                });
                right.write(w, out)?;
            }
            Expr::Function { name, args } => {
                out.push_str(name);
                out.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    arg.write(w, out)?;
                }
                out.push(')');
            }
            Expr::Label { expr, alias } => {
                expr.write(w, out)?;
                out.push_str(" AS ");
                out.push_str(&w.ident(alias));
            }
            Expr::Sort { expr, direction } => {
                expr.write(w, out)?;
                out.push(' ');
                out.push_str(direction.to_sql());
            }
        }
        Ok(())
    }
}

/// Rendering hooks used by `Expr::write`
pub trait ExprWriter {
    fn ident(&mut self, name: &str) -> String;
    fn literal(&mut self, value: &Value) -> Result<String, FilterError>;
    fn bind(&mut self, name: &str) -> Result<String, FilterError>;
    fn bind_expanding(&mut self, name: &str) -> Result<Vec<String>, FilterError>;
}

/// Renders literals inline; used for logs and assertions, never for execution
struct InlineWriter;

impl ExprWriter for InlineWriter {
    fn ident(&mut self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn literal(&mut self, value: &Value) -> Result<String, FilterError> {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(self.literal(item)?);
                }
                format!("({})", parts.join(", "))
            }
            other => other.to_string(),
        })
    }

    fn bind(&mut self, name: &str) -> Result<String, FilterError> {
        Ok(format!(":{}", name))
    }

    fn bind_expanding(&mut self, name: &str) -> Result<Vec<String>, FilterError> {
        Ok(vec![format!(":{}", name)])
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write(&mut InlineWriter, &mut out).map_err(|_| fmt::Error)?;
        f.write_str(&out)
    }
}

/// Compiler switches carried by a view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Accept `$raw` clauses. Only for trusted descriptors.
    #[serde(default)]
    pub allow_raw: bool,
    /// Upper bound for the page size of paginated selects
    #[serde(default)]
    pub max_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<Value>,
}
