//! SQL text generation for statements and table DDL.
//!
//! Literals never appear in the query text. Every value is pushed to
//! `SqlResult::params` and referenced through the dialect's positional
//! placeholder (`?` for SQLite, `$n` for Postgres).

use serde::Serialize;
use serde_json::Value;

use super::schema::{Column, ColumnType, Table};
use super::statement::{BindParams, Delete, Insert, Select, Statement, Update};
use crate::filter::{Expr, ExprWriter, FilterError, SqlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Detect from a connection URL scheme, e.g. `sqlite::memory:` or `postgres://...`
    pub fn from_url(database_url: &str) -> Option<Self> {
        let url = url::Url::parse(database_url).ok()?;
        match url.scheme() {
            "sqlite" => Some(Dialect::Sqlite),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    pub fn quote(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Positional placeholder for the `index`-th (1-based) parameter
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", index),
        }
    }

    fn column_type(&self, column: &Column) -> String {
        if column.primary_key && column.autoincrement {
            return match (self, column.kind) {
                (Dialect::Sqlite, _) => "INTEGER PRIMARY KEY AUTOINCREMENT".into(),
                (Dialect::Postgres, ColumnType::BigInteger) => "BIGSERIAL PRIMARY KEY".into(),
                (Dialect::Postgres, _) => "SERIAL PRIMARY KEY".into(),
            };
        }
        let base = match column.kind {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInteger => "BIGINT".to_string(),
            ColumnType::String => match column.length {
                Some(n) => format!("VARCHAR({})", n),
                None => "VARCHAR".to_string(),
            },
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Float => match self {
                Dialect::Sqlite => "REAL".to_string(),
                Dialect::Postgres => "DOUBLE PRECISION".to_string(),
            },
            ColumnType::Boolean => "BOOLEAN".to_string(),
        };
        if column.primary_key {
            format!("{} PRIMARY KEY", base)
        } else if !column.nullable {
            format!("{} NOT NULL", base)
        } else {
            base
        }
    }

    pub fn create_table(&self, table: &Table) -> Result<String, FilterError> {
        table.validate()?;
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", self.quote(&c.name), self.column_type(c)))
            .collect();
        Ok(format!("CREATE TABLE IF NOT EXISTS {} ({})", self.quote(&table.name), columns.join(", ")))
    }

    pub fn drop_table(&self, table: &Table) -> Result<String, FilterError> {
        table.validate()?;
        Ok(format!("DROP TABLE IF EXISTS {}", self.quote(&table.name)))
    }

    /// Single-parameter query returning a row iff the table exists
    pub fn exists_table(&self) -> SqlResult {
        let query = match self {
            Dialect::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            Dialect::Postgres => "SELECT relname FROM pg_class WHERE relname = $1",
        };
        SqlResult { query: query.to_string(), params: vec![] }
    }
}

/// Collects parameters while an expression tree is written out
struct Renderer<'a> {
    dialect: Dialect,
    binds: &'a BindParams,
    params: Vec<Value>,
}

impl<'a> Renderer<'a> {
    fn new(dialect: Dialect, binds: &'a BindParams) -> Self {
        Self { dialect, binds, params: Vec::new() }
    }

    fn push(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn expr(&mut self, expr: &Expr) -> Result<String, FilterError> {
        let mut out = String::new();
        expr.write(self, &mut out)?;
        Ok(out)
    }

    fn list(&mut self, exprs: &[Expr]) -> Result<String, FilterError> {
        let mut parts = Vec::with_capacity(exprs.len());
        for expr in exprs {
            parts.push(self.expr(expr)?);
        }
        Ok(parts.join(", "))
    }

    fn filter(&mut self, filter: &Option<Expr>, out: &mut String) -> Result<(), FilterError> {
        if let Some(expr) = filter {
            out.push_str(" WHERE ");
            let rendered = self.expr(expr)?;
            out.push_str(&rendered);
        }
        Ok(())
    }

    fn finish(self, query: String) -> SqlResult {
        SqlResult { query, params: self.params }
    }
}

impl ExprWriter for Renderer<'_> {
    fn ident(&mut self, name: &str) -> String {
        self.dialect.quote(name)
    }

    fn literal(&mut self, value: &Value) -> Result<String, FilterError> {
        Ok(self.push(value.clone()))
    }

    fn bind(&mut self, name: &str) -> Result<String, FilterError> {
        let value = self
            .binds
            .get(name)
            .cloned()
            .ok_or_else(|| FilterError::MissingBind(name.to_string()))?;
        Ok(self.push(value))
    }

    fn bind_expanding(&mut self, name: &str) -> Result<Vec<String>, FilterError> {
        let items = match self.binds.get(name) {
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(FilterError::ExpectedSequence(name.to_string())),
            None => return Err(FilterError::MissingBind(name.to_string())),
        };
        Ok(items.into_iter().map(|item| self.push(item)).collect())
    }
}

pub fn render_select(dialect: Dialect, select: &Select, binds: &BindParams) -> Result<SqlResult, FilterError> {
    let mut r = Renderer::new(dialect, binds);
    let mut query = format!("SELECT {} FROM {}", r.list(&select.columns)?, dialect.quote(&select.table));
    r.filter(&select.filter, &mut query)?;
    if let Some(group) = &select.group {
        query.push_str(" GROUP BY ");
        query.push_str(&r.list(group)?);
    }
    if let Some(order) = &select.order {
        query.push_str(" ORDER BY ");
        query.push_str(&r.list(order)?);
    }
    if let Some(limit) = select.limit {
        query.push_str(&format!(" LIMIT {}", limit));
        if let Some(offset) = select.offset {
            query.push_str(&format!(" OFFSET {}", offset));
        }
    }
    Ok(r.finish(query))
}

/// Postgres inserts return the generated key so callers can read it back
pub fn render_insert(dialect: Dialect, insert: &Insert) -> Result<SqlResult, FilterError> {
    if insert.columns.is_empty() || insert.rows.is_empty() {
        return Err(FilterError::EmptyInsert);
    }
    let binds = BindParams::new();
    let mut r = Renderer::new(dialect, &binds);
    let columns: Vec<String> = insert.columns.iter().map(|c| dialect.quote(c)).collect();
    let rows: Vec<String> = insert
        .rows
        .iter()
        .map(|row| {
            let slots: Vec<String> = row.iter().map(|v| r.push(v.clone())).collect();
            format!("({})", slots.join(", "))
        })
        .collect();
    let mut query = format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect.quote(&insert.table),
        columns.join(", "),
        rows.join(", ")
    );
    if let (Dialect::Postgres, Some(key)) = (dialect, &insert.key) {
        query.push_str(&format!(" RETURNING {}", dialect.quote(key)));
    }
    Ok(r.finish(query))
}

pub fn render_update(dialect: Dialect, update: &Update, binds: &BindParams) -> Result<SqlResult, FilterError> {
    if update.assignments.is_empty() {
        return Err(FilterError::EmptyAssignment);
    }
    let mut r = Renderer::new(dialect, binds);
    let mut sets = Vec::with_capacity(update.assignments.len());
    for (column, value) in &update.assignments {
        sets.push(format!("{} = {}", dialect.quote(column), r.expr(value)?));
    }
    let mut query = format!("UPDATE {} SET {}", dialect.quote(&update.table), sets.join(", "));
    r.filter(&update.filter, &mut query)?;
    Ok(r.finish(query))
}

/// One rendered statement per bind set of the update
pub fn render_update_all(dialect: Dialect, update: &Update) -> Result<Vec<SqlResult>, FilterError> {
    if update.binds.is_empty() {
        return Ok(vec![render_update(dialect, update, &BindParams::new())?]);
    }
    update.binds.iter().map(|binds| render_update(dialect, update, binds)).collect()
}

pub fn render_delete(dialect: Dialect, delete: &Delete, binds: &BindParams) -> Result<SqlResult, FilterError> {
    let mut r = Renderer::new(dialect, binds);
    let mut query = format!("DELETE FROM {}", dialect.quote(&delete.table));
    r.filter(&delete.filter, &mut query)?;
    Ok(r.finish(query))
}

/// Every executable form of a statement
pub fn render(dialect: Dialect, statement: &Statement) -> Result<Vec<SqlResult>, FilterError> {
    let empty = BindParams::new();
    match statement {
        Statement::Select(s) => Ok(vec![render_select(dialect, s, &empty)?]),
        Statement::Insert(i) => Ok(vec![render_insert(dialect, i)?]),
        Statement::Update(u) => render_update_all(dialect, u),
        Statement::Delete(d) => Ok(vec![render_delete(dialect, d, &empty)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::user_table;
    use crate::database::statement::{SelectPlan, SelectQuery, StatementBuilder};
    use crate::filter::{CompileOptions, FieldFilter};
    use serde_json::json;

    fn select_plan(form: Value) -> SelectPlan {
        let table = user_table();
        let keys = FieldFilter::blocking(["password"]);
        let options = CompileOptions::default();
        StatementBuilder::new(&table, &keys, &options)
            .select(&SelectQuery::from_form(&form, None))
            .unwrap()
    }

    #[test]
    fn detects_dialects() {
        assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("sqlite://data/app.db"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_url("postgres://u:p@localhost/db"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_url("postgresql://localhost/db"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_url("mysql://localhost/db"), None);
        assert_eq!(Dialect::from_url("not a url"), None);
    }

    #[test]
    fn select_binds_every_literal() {
        let plan = select_plan(json!({
            "keys": ["id", "email"],
            "where": {"id": {"opt": "$gt", "val": 3}, "account": [1, 2]},
            "order": ["-id"],
            "limit": [10, 5]
        }));
        let SelectPlan::Paged { data, count, .. } = plan else { panic!("expected paged plan") };
        let sql = render_select(Dialect::Postgres, &data, &BindParams::new()).unwrap();
        assert_eq!(
            sql.query,
            "SELECT \"id\", \"email\" FROM \"user\" WHERE \"id\" > $1 AND \"account\" IN ($2, $3) ORDER BY \"id\" DESC LIMIT 5 OFFSET 10"
        );
        assert_eq!(sql.params, vec![json!(3), json!(1), json!(2)]);

        let sql = render_select(Dialect::Sqlite, &count, &BindParams::new()).unwrap();
        assert_eq!(
            sql.query,
            "SELECT count(\"id\") AS \"_count\" FROM \"user\" WHERE \"id\" > ? AND \"account\" IN (?, ?)"
        );
    }

    #[test]
    fn expanding_placeholders_take_sequences() {
        let plan = select_plan(json!({"keys": ["id"], "where": {"id": {"opt": "$bind", "val": {"opt": "$in", "val": "ids"}}}}));
        let SelectPlan::Single(select) = plan else { panic!("expected single plan") };

        let mut binds = BindParams::new();
        binds.insert("ids".into(), json!([4, 5, 6]));
        let sql = render_select(Dialect::Sqlite, &select, &binds).unwrap();
        assert_eq!(sql.query, "SELECT \"id\" FROM \"user\" WHERE \"id\" IN (?, ?, ?)");
        assert_eq!(sql.params, vec![json!(4), json!(5), json!(6)]);

        binds.insert("ids".into(), json!(4));
        assert_eq!(
            render_select(Dialect::Sqlite, &select, &binds),
            Err(FilterError::ExpectedSequence("ids".into()))
        );
        assert_eq!(
            render_select(Dialect::Sqlite, &select, &BindParams::new()),
            Err(FilterError::MissingBind("ids".into()))
        );
    }

    #[test]
    fn insert_and_returning() {
        let table = user_table();
        let keys = FieldFilter::allow_all();
        let options = CompileOptions::default();
        let insert = StatementBuilder::new(&table, &keys, &options)
            .insert(&json!([{"account": "a"}, {"account": "b"}]))
            .unwrap();
        let sqlite = render_insert(Dialect::Sqlite, &insert).unwrap();
        assert_eq!(sqlite.query, "INSERT INTO \"user\" (\"account\") VALUES (?), (?)");
        let pg = render_insert(Dialect::Postgres, &insert).unwrap();
        assert_eq!(pg.query, "INSERT INTO \"user\" (\"account\") VALUES ($1), ($2) RETURNING \"id\"");
    }

    #[test]
    fn update_per_bind_set() {
        let table = user_table();
        let keys = FieldFilter::allow_all();
        let options = CompileOptions::default();
        let updates = StatementBuilder::new(&table, &keys, &options)
            .update(&json!({
                "where": {"id": {"opt": "$bind", "val": "uid"}},
                "values": {"role_name": "$bind.role", "create_time": "$incr.1"},
                "data": [{"uid": 1, "role": "a"}, {"uid": 2, "role": "b"}]
            }))
            .unwrap();
        let rendered = render_update_all(Dialect::Postgres, &updates[0]).unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(
            rendered[0].query,
            "UPDATE \"user\" SET \"role_name\" = $1, \"create_time\" = \"create_time\" + $2 WHERE \"id\" = $3"
        );
        assert_eq!(rendered[0].params, vec![json!("a"), json!(1), json!(1)]);
        assert_eq!(rendered[1].params, vec![json!("b"), json!(1), json!(2)]);
    }

    #[test]
    fn delete_without_predicate() {
        let delete = Delete { table: "user".into(), filter: None };
        assert_eq!(render_delete(Dialect::Sqlite, &delete, &BindParams::new()).unwrap().query, "DELETE FROM \"user\"");
    }

    #[test]
    fn table_ddl() {
        let table = user_table();
        assert_eq!(
            Dialect::Sqlite.create_table(&table).unwrap(),
            "CREATE TABLE IF NOT EXISTS \"user\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"account\" VARCHAR(16) NOT NULL, \"role_name\" VARCHAR(16) NOT NULL, \"email\" VARCHAR(256) NOT NULL, \"password\" VARCHAR(128) NOT NULL, \"create_time\" BIGINT NOT NULL)"
        );
        assert!(Dialect::Postgres.create_table(&table).unwrap().contains("\"id\" SERIAL PRIMARY KEY"));
        assert_eq!(Dialect::Postgres.drop_table(&table).unwrap(), "DROP TABLE IF EXISTS \"user\"");
    }
}
