use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::filter::error::FilterError;
use crate::filter::types::ColumnRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    BigInteger,
    String,
    Text,
    Float,
    Boolean,
}

/// Column declaration. Names are unique within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub autoincrement: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            length: None,
            primary_key: false,
            autoincrement: false,
            nullable: true,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn big_integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::BigInteger)
    }

    pub fn string(name: impl Into<String>, length: u32) -> Self {
        Self { length: Some(length), ..Self::new(name, ColumnType::String) }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    /// Auto-incrementing, non-null primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.autoincrement = matches!(self.kind, ColumnType::Integer | ColumnType::BigInteger);
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Relational table schema a view is bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), columns: vec![] }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_ref(&self, name: &str) -> Option<ColumnRef> {
        self.get(name).map(|c| ColumnRef::new(&self.name, &c.name))
    }

    /// Structural key: the primary key, else the first declared column
    pub fn key_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key).or_else(|| self.columns.first())
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if !is_identifier(&self.name) {
            return Err(FilterError::InvalidTableName(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !is_identifier(&column.name) {
                return Err(FilterError::InvalidColumn(column.name.clone()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(FilterError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
pub(crate) fn user_table() -> Table {
    Table::new("user")
        .column(Column::integer("id").primary_key())
        .column(Column::string("account", 16).not_null())
        .column(Column::string("role_name", 16).not_null())
        .column(Column::string("email", 256).not_null())
        .column(Column::string("password", 128).not_null())
        .column(Column::big_integer("create_time").not_null())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_column_prefers_primary_key() {
        let table = Table::new("t").column(Column::text("name")).column(Column::integer("id").primary_key());
        assert_eq!(table.key_column().map(|c| c.name.as_str()), Some("id"));
        let keyless = Table::new("t").column(Column::text("name"));
        assert_eq!(keyless.key_column().map(|c| c.name.as_str()), Some("name"));
    }

    #[test]
    fn validates_identifiers() {
        assert!(user_table().validate().is_ok());
        assert!(Table::new("bad name").validate().is_err());
        let dup = Table::new("t").column(Column::text("a")).column(Column::text("a"));
        assert_eq!(dup.validate(), Err(FilterError::DuplicateColumn("a".into())));
    }

    #[test]
    fn declares_from_yaml() {
        let table: Table = serde_yaml::from_str(
            "name: user\ncolumns:\n  - { name: id, type: integer, primary_key: true, autoincrement: true, nullable: false }\n  - { name: account, type: string, length: 16 }\n",
        )
        .unwrap();
        assert_eq!(table.columns.len(), 2);
        assert!(table.columns[0].primary_key);
        assert!(table.columns[1].nullable);
    }
}
