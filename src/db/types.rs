//! Shared type definitions for the database layer.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use thiserror::Error;

use crate::backend::Table;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Unknown column '{column}' on {table}")]
    UnknownColumn { table: &'static str, column: String },

    #[error("Invalid value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Constraint violated: {0}")]
    Constraint(String),
}

impl DbError {
    /// Lift SQLite constraint failures into `Constraint` so callers can tell a
    /// duplicate from an I/O problem.
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::Constraint(msg.unwrap_or_else(|| code.to_string()))
            }
            other => DbError::Sqlite(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    /// JSON array serialized into a TEXT column.
    JsonArray,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn text(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Text,
    }
}

const PROFILE_COLUMNS: &[Column] = &[
    text("id"),
    text("email"),
    text("role"),
    Column {
        name: "assigned_project_ids",
        kind: ColumnKind::JsonArray,
    },
];

const PROJECT_COLUMNS: &[Column] = &[
    text("id"),
    text("name"),
    text("description"),
    text("admin_id"),
];

const LEAD_COLUMNS: &[Column] = &[
    text("id"),
    text("client_name"),
    text("client_contact"),
    text("email"),
    text("city"),
    text("profession"),
    text("budget"),
    text("pref_location"),
    text("lead_source"),
    text("status"),
    text("prop_pref"),
    text("client_image_url"),
    text("user_id"),
    text("project_id"),
    text("created_at"),
    text("updated_at"),
    text("notes"),
];

/// Column whitelist per table. Anything not listed is rejected before SQL is built.
pub fn columns(table: Table) -> &'static [Column] {
    match table {
        Table::Profiles => PROFILE_COLUMNS,
        Table::Projects => PROJECT_COLUMNS,
        Table::Leads => LEAD_COLUMNS,
    }
}

pub fn column(table: Table, name: &str) -> Result<Column, DbError> {
    columns(table)
        .iter()
        .find(|c| c.name == name)
        .copied()
        .ok_or_else(|| DbError::UnknownColumn {
            table: table.as_str(),
            column: name.to_string(),
        })
}

pub fn has_column(table: Table, name: &str) -> bool {
    columns(table).iter().any(|c| c.name == name)
}

/// Convert a JSON value into a bindable SQLite value for `column`.
pub fn to_sql(column: &Column, value: &Value) -> Result<SqlValue, DbError> {
    let invalid = |reason: &str| DbError::InvalidValue {
        column: column.name.to_string(),
        reason: reason.to_string(),
    };
    match (column.kind, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (ColumnKind::Text, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
        (ColumnKind::Text, Value::Number(n)) => Ok(SqlValue::Text(n.to_string())),
        (ColumnKind::Text, Value::Bool(b)) => Ok(SqlValue::Text(b.to_string())),
        (ColumnKind::Text, _) => Err(invalid("expected a scalar")),
        (ColumnKind::JsonArray, Value::Array(_)) => Ok(SqlValue::Text(value.to_string())),
        (ColumnKind::JsonArray, _) => Err(invalid("expected an array")),
    }
}

/// Read `column` at `idx` back into JSON.
pub fn from_sql(column: &Column, row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: Option<String> = row.get(idx)?;
    Ok(match (column.kind, raw) {
        (_, None) => Value::Null,
        (ColumnKind::Text, Some(s)) => Value::String(s),
        (ColumnKind::JsonArray, Some(s)) => {
            serde_json::from_str(&s).unwrap_or_else(|_| Value::Array(Vec::new()))
        }
    })
}
