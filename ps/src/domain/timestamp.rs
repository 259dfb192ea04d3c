//! Lenient timestamp parsing for document fields
//!
//! Timestamps are written as RFC 3339. Older documents carry naive ISO 8601
//! local times without an offset; those are read as UTC. An optional
//! timestamp that cannot be parsed is dropped rather than failing the load.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

pub(crate) fn parse(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Missing, null or unparseable values read as `None`
pub(crate) fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(raw) => {
            let parsed = parse(&raw);
            if parsed.is_none() {
                warn!(%raw, "Ignoring unparseable timestamp");
            }
            Ok(parsed)
        }
        other => {
            warn!(%other, "Ignoring non-string timestamp");
            Ok(None)
        }
    }
}
