//! Append-only audit trail
//!
//! ```text
//! conversation-log.jsonl   one LogEntry per line, authoritative
//! conversation-log.md      Markdown narrative of the same entries
//! ```

pub(crate) mod jsonl;
mod logger;
pub mod types;

pub use logger::EventLog;
pub use types::LogEntry;
