// Service layer: business operations taking `&AppState`.
// The CLI and any embedding UI call these; they own no state of their own.

pub mod auth;
pub mod intake;
pub mod invitations;
pub mod leads;
pub mod projects;

use serde::de::DeserializeOwned;

use crate::backend::Row;
use crate::error::Result;

/// Decode one directory row into a typed record.
pub(crate) fn decode<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(row))?)
}

pub(crate) fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

/// Build a row from `(column, value)` pairs.
pub(crate) fn row<I>(pairs: I) -> Row
where
    I: IntoIterator<Item = (&'static str, serde_json::Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}
