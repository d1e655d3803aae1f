use chrono::{SecondsFormat, Utc};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::*;

/// Microsecond UTC stamps sort lexically in time order.
fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// WHERE fragment plus its bound parameters.
struct Clause {
    sql: Vec<String>,
    params: Vec<SqlValue>,
}

impl Clause {
    fn new() -> Self {
        Self {
            sql: Vec::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, table: Table, filter: &Filter) -> Result<(), DbError> {
        let col = column(table, filter.column())?;
        match filter {
            Filter::Eq(_, value) => {
                if value.is_null() {
                    self.sql.push(format!("{} IS NULL", col.name));
                } else {
                    self.sql.push(format!("{} = ?", col.name));
                    self.params.push(to_sql(&col, value)?);
                }
            }
            Filter::In(_, values) => {
                if values.is_empty() {
                    // IN () matches nothing
                    self.sql.push("0".to_string());
                } else {
                    let marks = vec!["?"; values.len()].join(", ");
                    self.sql.push(format!("{} IN ({})", col.name, marks));
                    for value in values {
                        self.params.push(to_sql(&col, value)?);
                    }
                }
            }
            Filter::IsNull(_) => self.sql.push(format!("{} IS NULL", col.name)),
            Filter::Contains(_, value) => {
                if col.kind != ColumnKind::JsonArray {
                    return Err(DbError::InvalidValue {
                        column: col.name.to_string(),
                        reason: "contains filter needs an array column".to_string(),
                    });
                }
                self.sql.push(format!(
                    "EXISTS (SELECT 1 FROM json_each({}) WHERE json_each.value = ?)",
                    col.name
                ));
                let element = match value {
                    Value::String(s) => SqlValue::Text(s.clone()),
                    other => SqlValue::Text(other.to_string()),
                };
                self.params.push(element);
            }
        }
        Ok(())
    }

    fn render(&self) -> String {
        if self.sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql.join(" AND "))
        }
    }
}

impl DirectoryDb {
    fn column_list(table: Table) -> String {
        columns(table)
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn map_row(table: Table, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
        let mut out = Row::new();
        for (idx, col) in columns(table).iter().enumerate() {
            out.insert(col.name.to_string(), from_sql(col, row, idx)?);
        }
        Ok(out)
    }

    /// Filtered, optionally ordered read.
    pub fn select_rows(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Row>, DbError> {
        let mut clause = Clause::new();
        for filter in filters {
            clause.push(table, filter)?;
        }
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            Self::column_list(table),
            table.as_str(),
            clause.render()
        );
        if let Some(order) = order {
            let col = column(table, order.column)?;
            sql.push_str(&format!(
                " ORDER BY {} {}",
                col.name,
                if order.ascending { "ASC" } else { "DESC" }
            ));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(clause.params.iter()), |row| {
            Self::map_row(table, row)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_row(&self, table: Table, id: &str) -> Result<Option<Row>, DbError> {
        let mut rows = self.select_rows(table, &[Filter::eq("id", id)], None)?;
        Ok(rows.pop())
    }

    /// Insert a record, generating `id` and `created_at` when absent.
    pub fn insert_row(&self, table: Table, mut record: Row) -> Result<Row, DbError> {
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                record.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        if has_column(table, "created_at")
            && record.get("created_at").map_or(true, Value::is_null)
        {
            record.insert("created_at".into(), Value::String(timestamp_now()));
        }

        let mut names = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (name, value) in &record {
            let col = column(table, name)?;
            names.push(col.name);
            values.push(to_sql(&col, value)?);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.as_str(),
            names.join(", "),
            vec!["?"; names.len()].join(", ")
        );
        self.conn
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(DbError::from_write)?;

        self.get_row(table, &id)?
            .ok_or_else(|| DbError::Constraint(format!("inserted row {} vanished", id)))
    }

    /// Conditional update in one statement. Returns the row as stored after the
    /// update, or `None` if `id` does not exist or the predicate did not hold.
    pub fn update_row(
        &self,
        table: Table,
        id: &str,
        mut fields: Row,
        predicate: &[Filter],
    ) -> Result<Option<Row>, DbError> {
        fields.remove("id");
        if fields.is_empty() {
            // Nothing to write: report whether the guarded row exists.
            let mut filters = vec![Filter::eq("id", id)];
            filters.extend_from_slice(predicate);
            return Ok(self.select_rows(table, &filters, None)?.pop());
        }
        if has_column(table, "updated_at") && !fields.contains_key("updated_at") {
            fields.insert("updated_at".into(), Value::String(timestamp_now()));
        }

        let mut sets = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len() + 1);
        for (name, value) in &fields {
            let col = column(table, name)?;
            sets.push(format!("{} = ?", col.name));
            params.push(to_sql(&col, value)?);
        }

        let mut clause = Clause::new();
        clause.push(table, &Filter::eq("id", id))?;
        for filter in predicate {
            clause.push(table, filter)?;
        }
        params.extend(clause.params.iter().cloned());

        let sql = format!(
            "UPDATE {} SET {}{}",
            table.as_str(),
            sets.join(", "),
            clause.render()
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(params.iter()))
            .map_err(DbError::from_write)?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_row(table, id)
    }
}
