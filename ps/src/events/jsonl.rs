//! Locked append and tolerant read for JSONL files

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::PersistError;
use crate::lock::{LockMode, Locker};

/// Append raw bytes under an exclusive lock, creating the file and its directory
pub(crate) fn append(path: &Path, bytes: &[u8], locker: &dyn Locker) -> Result<(), PersistError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistError::io(path, e))?;

    let _guard = locker.lock(&file, path, LockMode::Exclusive)?;
    (&file).write_all(bytes).map_err(|e| PersistError::io(path, e))?;
    (&file).flush().map_err(|e| PersistError::io(path, e))
}

/// Serialize `record` as one line and append it
pub(crate) fn append_record<T: Serialize>(path: &Path, record: &T, locker: &dyn Locker) -> Result<(), PersistError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    append(path, line.as_bytes(), locker)
}

/// Every line that parses as `T`, oldest first
///
/// A missing file reads as empty. Blank lines are ignored and lines that
/// fail to parse are skipped with a warning.
pub(crate) fn read_records<T: DeserializeOwned>(path: &Path, locker: &dyn Locker) -> Result<Vec<T>, PersistError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistError::io(path, e)),
    };

    let _guard = locker.lock(&file, path, LockMode::Shared)?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(&file).lines().enumerate() {
        let line = line.map_err(|e| PersistError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(?path, line = index + 1, error = %e, "Skipping unparseable log line"),
        }
    }

    debug!(?path, count = records.len(), "read_records: loaded");
    Ok(records)
}
