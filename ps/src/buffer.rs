//! WriteBuffer - batched writes of per-document records
//!
//! Records accumulate in memory and are written out as one immutable JSONL
//! batch file once `batch_size` is reached, via the same temp-file + rename
//! as the state store. Lookups check memory before disk.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::PersistError;
use crate::lock::Locker;
use crate::store::atomic_write;

const BATCH_PREFIX: &str = "batch_";
const BATCH_SUFFIX: &str = ".jsonl";

/// One buffered record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedRecord {
    pub doc_id: String,
    #[serde(deserialize_with = "crate::domain::timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub reasoning: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct WriteBuffer {
    dir: PathBuf,
    batch_size: usize,
    pending: Vec<BufferedRecord>,
    total_flushed: u64,
    locker: Arc<dyn Locker>,
}

impl WriteBuffer {
    pub fn new(dir: impl AsRef<Path>, batch_size: usize, locker: Arc<dyn Locker>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        debug!(?dir, batch_size, "WriteBuffer::new: called");
        Self {
            dir,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            total_flushed: 0,
            locker,
        }
    }

    /// Buffer writing into the project's reasoning directory
    pub fn for_project(project_root: &Path, config: &Config, locker: Arc<dyn Locker>) -> Self {
        Self::new(config.reasoning_path(project_root), config.batch_size, locker)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records not yet written to disk
    pub fn pending(&self) -> &[BufferedRecord] {
        &self.pending
    }

    /// Records written by this buffer so far
    pub fn total_flushed(&self) -> u64 {
        self.total_flushed
    }

    /// Buffer a record, flushing when the batch is full
    ///
    /// Returns the batch file path when this call triggered a flush.
    pub fn add(&mut self, doc_id: &str, reasoning: Value, metadata: Option<Value>) -> Result<Option<PathBuf>, PersistError> {
        debug!(%doc_id, pending = self.pending.len(), "WriteBuffer::add: called");
        self.pending.push(BufferedRecord {
            doc_id: doc_id.to_string(),
            timestamp: Utc::now(),
            reasoning,
            metadata,
            extra: Map::new(),
        });

        if self.pending.len() >= self.batch_size {
            return self.flush();
        }
        Ok(None)
    }

    /// Write every pending record to a new batch file
    ///
    /// `None` when nothing was pending. On error the records stay buffered.
    pub fn flush(&mut self) -> Result<Option<PathBuf>, PersistError> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir).map_err(|e| PersistError::io(&self.dir, e))?;
        // Buffers sharing a directory can flush within the same millisecond
        let name = format!(
            "{BATCH_PREFIX}{}_{:08}_{}{BATCH_SUFFIX}",
            Utc::now().format("%Y%m%d_%H%M%S%3f"),
            self.total_flushed,
            Uuid::now_v7().simple()
        );
        let path = self.dir.join(name);

        let mut contents = Vec::new();
        for record in &self.pending {
            serde_json::to_writer(&mut contents, record)?;
            contents.push(b'\n');
        }
        atomic_write(&path, &contents, self.locker.as_ref())?;

        let flushed = mem::take(&mut self.pending);
        self.total_flushed += flushed.len() as u64;
        info!(?path, records = flushed.len(), "Flushed record batch");
        Ok(Some(path))
    }

    /// Batch files in name order, which is creation order
    pub fn batch_files(&self) -> Result<Vec<PathBuf>, PersistError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistError::io(&self.dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PersistError::io(&self.dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(BATCH_PREFIX) && name.ends_with(BATCH_SUFFIX) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_batch(path: &Path) -> Result<Vec<BufferedRecord>, PersistError> {
        let file = File::open(path).map_err(|e| PersistError::io(path, e))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| PersistError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BufferedRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(?path, error = %e, "WriteBuffer::read_batch: skipping unparseable line"),
            }
        }
        Ok(records)
    }

    /// Reasoning recorded for `doc_id`, checking memory before disk
    pub fn get_for_doc(&self, doc_id: &str) -> Result<Option<Value>, PersistError> {
        if let Some(record) = self.pending.iter().find(|r| r.doc_id == doc_id) {
            return Ok(Some(record.reasoning.clone()));
        }

        for path in self.batch_files()? {
            if let Some(record) = Self::read_batch(&path)?.into_iter().find(|r| r.doc_id == doc_id) {
                return Ok(Some(record.reasoning));
            }
        }
        Ok(None)
    }

    /// Every record, flushed batches first, then what is still pending
    pub fn all(&self) -> Result<Vec<BufferedRecord>, PersistError> {
        let mut records = Vec::new();
        for path in self.batch_files()? {
            records.extend(Self::read_batch(&path)?);
        }
        records.extend(self.pending.iter().cloned());
        Ok(records)
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        debug!(pending = self.pending.len(), "WriteBuffer::drop: flushing");
        if let Err(e) = self.flush() {
            warn!(error = %e, records = self.pending.len(), "WriteBuffer::drop: failed to flush pending records");
        }
    }
}
