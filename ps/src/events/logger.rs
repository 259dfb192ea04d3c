//! EventLog - dual-sink append-only log
//!
//! Every entry is appended to a JSONL file and rendered into a Markdown
//! narrative. Each sink is locked on its own; the JSONL file is the
//! authoritative record and the only one queried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::jsonl;
use super::types::LogEntry;
use crate::config::Config;
use crate::error::PersistError;
use crate::lock::Locker;

pub struct EventLog {
    jsonl_path: PathBuf,
    narrative_path: PathBuf,
    locker: Arc<dyn Locker>,
}

impl EventLog {
    pub fn new(jsonl_path: impl AsRef<Path>, narrative_path: impl AsRef<Path>, locker: Arc<dyn Locker>) -> Self {
        let jsonl_path = jsonl_path.as_ref().to_path_buf();
        let narrative_path = narrative_path.as_ref().to_path_buf();
        debug!(?jsonl_path, ?narrative_path, "EventLog::new: called");
        Self {
            jsonl_path,
            narrative_path,
            locker,
        }
    }

    /// Event log in the project's state directory
    pub fn for_project(project_root: &Path, config: &Config, locker: Arc<dyn Locker>) -> Self {
        Self::new(
            config.event_log_path(project_root),
            config.narrative_path(project_root),
            locker,
        )
    }

    pub fn jsonl_path(&self) -> &Path {
        &self.jsonl_path
    }

    pub fn narrative_path(&self) -> &Path {
        &self.narrative_path
    }

    /// Append `entry` to both sinks, structured first
    pub fn log(&self, entry: &LogEntry) -> Result<(), PersistError> {
        debug!(event_type = %entry.event_type, agent = %entry.agent, "EventLog::log: called");
        jsonl::append_record(&self.jsonl_path, entry, self.locker.as_ref())?;

        let mut section = entry.to_narrative();
        section.push_str("\n\n");
        jsonl::append(&self.narrative_path, section.as_bytes(), self.locker.as_ref())
    }

    /// Log `content` under `event_type`, stamped now
    pub fn log_event(&self, event_type: &str, content: Value, agent: Option<&str>) -> Result<LogEntry, PersistError> {
        let mut entry = LogEntry::new(event_type, content, Utc::now());
        if let Some(agent) = agent {
            entry = entry.with_agent(agent);
        }
        self.log(&entry)?;
        Ok(entry)
    }

    /// Every parseable entry, oldest first
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<LogEntry>, PersistError> {
        debug!(path = ?self.jsonl_path, "EventLog::read_all: called");
        jsonl::read_records(&self.jsonl_path, self.locker.as_ref())
    }

    /// The `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Result<Vec<LogEntry>, PersistError> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    pub fn by_type(&self, event_type: &str) -> Result<Vec<LogEntry>, PersistError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect())
    }
}
