//! Field-level leniency for documents other tools also write
//!
//! A `null` or a value of the wrong type in one field falls back to that
//! field's default instead of failing the whole document. Lists and maps of
//! typed records drop only the entries that do not fit. Only bytes that are
//! not a JSON object at all make a document corrupt.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

fn convert<T: DeserializeOwned>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, expected = std::any::type_name::<T>(), "Ignoring malformed document value");
            None
        }
    }
}

/// Null or mistyped values become `T::default()`
pub(crate) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(convert(value).unwrap_or_default())
}

/// Entries that do not fit `T` are dropped; a non-array becomes empty
pub(crate) fn seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => Ok(items.into_iter().filter_map(convert).collect()),
        Value::Null => Ok(Vec::new()),
        other => {
            warn!(found = %kind(&other), "Expected a list, using an empty one");
            Ok(Vec::new())
        }
    }
}

/// Values that do not fit `T` are dropped; a non-object becomes empty
pub(crate) fn map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Object(entries) => Ok(entries
            .into_iter()
            .filter_map(|(k, v)| convert(v).map(|v| (k, v)))
            .collect()),
        Value::Null => Ok(BTreeMap::new()),
        other => {
            warn!(found = %kind(&other), "Expected an object, using an empty one");
            Ok(BTreeMap::new())
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
