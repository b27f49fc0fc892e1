use serde_json::Value;

use super::keys::FieldFilter;
use super::types::{Expr, SortDirection};
use crate::database::schema::{is_identifier, Table};

/// Ordering and grouping key compilation
pub struct FilterOrder<'a> {
    table: &'a Table,
    keys: &'a FieldFilter,
}

impl<'a> FilterOrder<'a> {
    pub fn new(table: &'a Table, keys: &'a FieldFilter) -> Self {
        Self { table, keys }
    }

    /// `["-create_time", "id"]` or `"-create_time, id"`. A trailing
    /// `asc`/`desc` word is accepted as well (`"id desc"`).
    pub fn compile_order(&self, spec: &Value) -> Option<Vec<Expr>> {
        let out: Vec<Expr> = entries(spec)
            .into_iter()
            .filter_map(|entry| {
                let (name, direction) = parse_entry(&entry);
                let key = self.key(name)?;
                Some(Expr::Sort { expr: Box::new(key), direction })
            })
            .collect();
        if out.is_empty() { None } else { Some(out) }
    }

    /// Same entry grammar as ordering; direction markers are ignored
    pub fn compile_group(&self, spec: &Value) -> Option<Vec<Expr>> {
        let out: Vec<Expr> = entries(spec)
            .into_iter()
            .filter_map(|entry| self.key(parse_entry(&entry).0))
            .collect();
        if out.is_empty() { None } else { Some(out) }
    }

    fn key(&self, name: &str) -> Option<Expr> {
        match self.table.column_ref(name) {
            Some(column) if self.keys.allows(name) => Some(Expr::Column(column)),
            Some(_) => {
                tracing::debug!("Dropping key {} hidden by field filter", name);
                None
            }
            // labels and other computed names are passed through untouched
            None if is_identifier(name) => Some(Expr::Raw(name.to_string())),
            None => {
                tracing::warn!("Dropping ordering expression {:?}: not a plain identifier", name);
                None
            }
        }
    }
}

fn entries(spec: &Value) -> Vec<String> {
    match spec {
        Value::String(s) => s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(String::from).collect(),
        Value::Array(arr) => arr
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
        _ => vec![],
    }
}

fn parse_entry(entry: &str) -> (&str, SortDirection) {
    let mut it = entry.split_whitespace();
    let head = it.next().unwrap_or_default();
    let (name, mut direction) = match head.strip_prefix('-') {
        Some(rest) => (rest, SortDirection::Desc),
        None => (head, SortDirection::Asc),
    };
    if let Some(word) = it.next() {
        if word.eq_ignore_ascii_case("desc") {
            direction = SortDirection::Desc;
        } else if word.eq_ignore_ascii_case("asc") {
            direction = SortDirection::Asc;
        }
    }
    (name, direction)
}
