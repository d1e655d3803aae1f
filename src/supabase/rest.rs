//! PostgREST directory store.

use async_trait::async_trait;
use serde_json::Value;

use super::SupabaseClient;
use crate::backend::{BackendError, DirectoryStore, Filter, Order, Row, Table};

/// Scalar as PostgREST expects it in a filter.
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Double-quoted list element, safe for commas and parentheses.
fn quoted(value: &Value) -> String {
    let raw = scalar(value);
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `(column, operator.value)` query pair for one filter.
pub(crate) fn filter_param(filter: &Filter) -> (String, String) {
    let value = match filter {
        Filter::Eq(_, Value::Null) | Filter::IsNull(_) => "is.null".to_string(),
        Filter::Eq(_, v) => format!("eq.{}", scalar(v)),
        Filter::In(_, values) => format!(
            "in.({})",
            values.iter().map(quoted).collect::<Vec<_>>().join(",")
        ),
        Filter::Contains(_, v) => format!("cs.{{{}}}", quoted(v)),
    };
    (filter.column().to_string(), value)
}

pub(crate) fn order_param(order: &Order) -> (String, String) {
    (
        "order".to_string(),
        format!(
            "{}.{}",
            order.column,
            if order.ascending { "asc" } else { "desc" }
        ),
    )
}

fn rows_from(value: Value) -> Result<Vec<Row>, BackendError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(BackendError::Decode(format!("expected a row, got {}", other))),
            })
            .collect(),
        other => Err(BackendError::Decode(format!("expected rows, got {}", other))),
    }
}

impl SupabaseClient {
    fn table_url(&self, table: Table) -> Result<url::Url, BackendError> {
        self.endpoint(&format!("rest/v1/{}", table.as_str()))
    }
}

#[async_trait]
impl DirectoryStore for SupabaseClient {
    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> Result<Vec<Row>, BackendError> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filters.iter().map(filter_param));
        query.extend(order.map(order_param));

        let response = self
            .send(self.http.get(self.table_url(table)?).query(&query))
            .await?;
        rows_from(response.json().await?)
    }

    async fn insert(&self, table: Table, record: Row) -> Result<Row, BackendError> {
        let response = self
            .send(
                self.http
                    .post(self.table_url(table)?)
                    .header("Prefer", "return=representation")
                    .json(&record),
            )
            .await?;
        rows_from(response.json().await?)?
            .pop()
            .ok_or_else(|| BackendError::Decode("insert returned no row".to_string()))
    }

    async fn update(
        &self,
        table: Table,
        id: &str,
        fields: Row,
        predicate: &[Filter],
    ) -> Result<Option<Row>, BackendError> {
        let mut query = vec![filter_param(&Filter::eq("id", id))];
        query.extend(predicate.iter().map(filter_param));

        let response = self
            .send(
                self.http
                    .patch(self.table_url(table)?)
                    .query(&query)
                    .header("Prefer", "return=representation")
                    .json(&fields),
            )
            .await?;
        // Zero matched rows come back as `[]`: the predicate did not hold.
        Ok(rows_from(response.json().await?)?.pop())
    }
}
