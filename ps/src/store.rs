//! StateStore - atomic, cached access to the project state document
//!
//! One JSON document per project. Reads take a shared lock on the file,
//! writes go to a unique temporary sibling under an exclusive lock and are
//! renamed over the target, so a reader sees either the whole old document
//! or the whole new one, even if the writer crashes mid-write.
//!
//! Concurrent writers are last-writer-wins. `version` is bumped on every
//! save but never compared against the version that was read.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{ProjectState, SandwichStatus, Stage};
use crate::error::{PersistError, StoreError};
use crate::lock::{LockMode, Locker, LockingInfo};

/// Identity of the file contents a cache entry was read from
///
/// Every save renames a new file into place, so on Unix the inode changes
/// even when two saves land in the same mtime tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileStamp {
    modified: SystemTime,
    len: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileStamp {
    fn of(meta: &Metadata) -> std::io::Result<Self> {
        Ok(Self {
            modified: meta.modified()?,
            len: meta.len(),
            #[cfg(unix)]
            ino: std::os::unix::fs::MetadataExt::ino(meta),
        })
    }

    /// Cache taken at `self` is still valid for a file now at `current`
    fn covers(&self, current: &FileStamp) -> bool {
        let same_file = self.len == current.len;
        #[cfg(unix)]
        let same_file = same_file && self.ino == current.ino;
        same_file && self.modified >= current.modified
    }
}

/// Write `contents` to `path` via a temporary sibling and a rename
///
/// The target is never observed partially written. Returns the stamp of
/// the file that was renamed into place.
pub(crate) fn atomic_write(path: &Path, contents: &[u8], locker: &dyn Locker) -> Result<FileStamp, PersistError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp_path = path.with_file_name(format!("{}.{}.tmp", file_name, Uuid::now_v7().simple()));
    debug!(?path, ?tmp_path, bytes = contents.len(), "atomic_write: called");

    let stamp = match write_temp(&tmp_path, contents, locker) {
        Ok(stamp) => stamp,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(PersistError::io(path, source));
    }
    sync_parent_dir(path);

    Ok(stamp)
}

fn write_temp(tmp_path: &Path, contents: &[u8], locker: &dyn Locker) -> Result<FileStamp, PersistError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)
        .map_err(|e| PersistError::io(tmp_path, e))?;

    let _guard = locker.lock(&file, tmp_path, LockMode::Exclusive)?;
    (&file).write_all(contents).map_err(|e| PersistError::io(tmp_path, e))?;
    (&file).flush().map_err(|e| PersistError::io(tmp_path, e))?;
    file.sync_all().map_err(|e| PersistError::io(tmp_path, e))?;

    let meta = file.metadata().map_err(|e| PersistError::io(tmp_path, e))?;
    FileStamp::of(&meta).map_err(|e| PersistError::io(tmp_path, e))
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(dir) = path.parent()
        && let Ok(handle) = File::open(dir)
        && let Err(e) = handle.sync_all()
    {
        debug!(?dir, error = %e, "sync_parent_dir: directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Where a loaded document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// In-memory copy, file unchanged since it was read or written
    Cache,
    /// Read and parsed from disk
    Disk,
    /// No document existed; a default one was created
    Initialized,
    /// The document failed to parse and was replaced with a default
    Recovered,
}

/// Result of [`StateStore::load_with_origin`]
#[derive(Debug, Clone)]
pub struct Loaded {
    pub state: ProjectState,
    pub origin: LoadOrigin,
}

enum ReadOutcome {
    Missing,
    Parsed(Box<ProjectState>, FileStamp),
    Corrupt(String),
}

struct CachedState {
    state: ProjectState,
    stamp: FileStamp,
}

/// Human-readable progress summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub stage: Stage,
    pub stage_name: String,
    pub progress_percent: f64,
    pub documents_manually_coded: u64,
    pub documents_coded_total: u64,
    pub memos_written: u64,
    pub codes_created: u64,
    pub stage1_complete: bool,
    pub tradition: String,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Store for one project's state document
pub struct StateStore {
    state_dir: PathBuf,
    state_file: PathBuf,
    locker: Arc<dyn Locker>,
    min_manual_documents: u64,
    cache: Mutex<Option<CachedState>>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("state_file", &self.state_file)
            .field("locker", &self.locker)
            .finish()
    }
}

impl StateStore {
    /// Store for the project rooted at `project_root`
    pub fn new(project_root: impl AsRef<Path>, config: &Config, locker: Arc<dyn Locker>) -> Self {
        let root = project_root.as_ref();
        let state_dir = config.state_dir_in(root);
        let state_file = config.state_path(root);
        debug!(?state_file, "StateStore::new: called");
        Self {
            state_dir,
            state_file,
            locker,
            min_manual_documents: config.min_manual_documents,
            cache: Mutex::new(None),
        }
    }

    /// Path of the state document
    pub fn path(&self) -> &Path {
        &self.state_file
    }

    pub fn locking_info(&self) -> LockingInfo {
        LockingInfo::for_locker(self.locker.as_ref())
    }

    fn cache(&self) -> MutexGuard<'_, Option<CachedState>> {
        // The cache only ever holds a fully written document
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load the document
    pub fn load(&self) -> Result<ProjectState, StoreError> {
        Ok(self.load_with_origin()?.state)
    }

    /// Load the document and report where it came from
    ///
    /// A missing document is created; a corrupt one is replaced with a fresh
    /// default and logged. Neither is an error.
    pub fn load_with_origin(&self) -> Result<Loaded, StoreError> {
        debug!(path = ?self.state_file, "StateStore::load_with_origin: called");

        let current = match fs::metadata(&self.state_file) {
            Ok(meta) => FileStamp::of(&meta).map_err(|e| PersistError::io(&self.state_file, e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return self.initialize(LoadOrigin::Initialized);
            }
            Err(e) => return Err(PersistError::io(&self.state_file, e).into()),
        };

        if let Some(cached) = self.cache().as_ref()
            && cached.stamp.covers(&current)
        {
            debug!("StateStore::load_with_origin: cache hit");
            return Ok(Loaded {
                state: cached.state.clone(),
                origin: LoadOrigin::Cache,
            });
        }

        match self.read_from_disk()? {
            ReadOutcome::Parsed(state, stamp) => {
                *self.cache() = Some(CachedState {
                    state: (*state).clone(),
                    stamp,
                });
                Ok(Loaded {
                    state: *state,
                    origin: LoadOrigin::Disk,
                })
            }
            ReadOutcome::Missing => self.initialize(LoadOrigin::Initialized),
            ReadOutcome::Corrupt(reason) => {
                warn!(path = ?self.state_file, %reason, "Could not load state file, replacing with a fresh default");
                self.initialize(LoadOrigin::Recovered)
            }
        }
    }

    fn read_from_disk(&self) -> Result<ReadOutcome, StoreError> {
        let file = match File::open(&self.state_file) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReadOutcome::Missing),
            Err(e) => return Err(PersistError::io(&self.state_file, e).into()),
        };

        let (bytes, meta) = {
            let _guard = self.locker.lock(&file, &self.state_file, LockMode::Shared)?;
            let mut bytes = Vec::new();
            (&file)
                .read_to_end(&mut bytes)
                .map_err(|e| PersistError::io(&self.state_file, e))?;
            let meta = file.metadata().map_err(|e| PersistError::io(&self.state_file, e))?;
            (bytes, meta)
        };
        let stamp = FileStamp::of(&meta).map_err(|e| PersistError::io(&self.state_file, e))?;

        // Field-level problems are absorbed by the lenient deserializers, so
        // only malformed JSON or a non-object root ends up here
        match serde_json::from_slice::<ProjectState>(&bytes) {
            Ok(state) => Ok(ReadOutcome::Parsed(Box::new(state), stamp)),
            Err(e) => Ok(ReadOutcome::Corrupt(e.to_string())),
        }
    }

    fn initialize(&self, origin: LoadOrigin) -> Result<Loaded, StoreError> {
        info!(path = ?self.state_file, ?origin, "Creating default project state");
        let mut state = ProjectState::new(Utc::now());
        self.write_internal(&mut state)?;
        Ok(Loaded { state, origin })
    }

    /// Persist `state`, bumping its version and `last_updated`
    pub fn save(&self, state: &mut ProjectState) -> Result<(), StoreError> {
        state.version += 1;
        debug!(version = state.version, "StateStore::save: called");
        self.write_internal(state)
    }

    fn write_internal(&self, state: &mut ProjectState) -> Result<(), StoreError> {
        state.last_updated = Some(Utc::now());

        fs::create_dir_all(&self.state_dir).map_err(|e| PersistError::io(&self.state_dir, e))?;
        let json = serde_json::to_vec_pretty(state).map_err(PersistError::from)?;
        let stamp = atomic_write(&self.state_file, &json, self.locker.as_ref())?;

        *self.cache() = Some(CachedState {
            state: state.clone(),
            stamp,
        });
        Ok(())
    }

    /// Load, apply `f`, save
    ///
    /// Nothing is written if `f` fails. Concurrent updates from other
    /// processes between the load and the save are overwritten.
    pub fn try_update<T, E>(&self, f: impl FnOnce(&mut ProjectState) -> Result<T, E>) -> Result<(ProjectState, T), E>
    where
        E: From<StoreError>,
    {
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.save(&mut state)?;
        Ok((state, out))
    }

    /// Infallible form of [`StateStore::try_update`]
    pub fn update<T>(&self, f: impl FnOnce(&mut ProjectState) -> T) -> Result<(ProjectState, T), StoreError> {
        self.try_update(|state| Ok::<T, StoreError>(f(state)))
    }

    /// Move to `new_stage` if the adjacency table and preconditions allow it
    pub fn transition_stage(&self, new_stage: Stage) -> Result<ProjectState, StoreError> {
        debug!(%new_stage, "StateStore::transition_stage: called");
        let min_manual = self.min_manual_documents;

        let (state, ()) = self.try_update(|state| {
            let current = state.current_stage;
            if !current.can_transition_to(new_stage) {
                let allowed = current
                    .valid_transitions()
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(StoreError::InvalidTransition {
                    from: current,
                    to: new_stage,
                    allowed,
                });
            }

            if new_stage == Stage::Stage2 {
                if !state.stage1_complete && state.documents_manually_coded < min_manual {
                    return Err(StoreError::PreconditionNotMet {
                        to: new_stage,
                        have: state.documents_manually_coded,
                        need: min_manual,
                    });
                }
                state.stage1_complete = true;
            }

            state.current_stage = new_stage;
            sync_sandwich_stage(state, new_stage);
            Ok(())
        })?;

        info!(stage = %new_stage, version = state.version, "Stage transition complete");
        Ok(state)
    }

    /// Count a coded document
    pub fn increment_document_count(&self, manual: bool) -> Result<ProjectState, StoreError> {
        let (state, ()) = self.update(|state| {
            state.documents_coded += 1;
            if manual {
                state.documents_manually_coded += 1;
            }
        })?;
        Ok(state)
    }

    /// Count a memo
    pub fn add_memo(&self) -> Result<ProjectState, StoreError> {
        let (state, ()) = self.update(|state| state.memos_written += 1)?;
        Ok(state)
    }

    /// Progress summary for display
    pub fn status(&self) -> Result<StatusSummary, StoreError> {
        let state = self.load()?;
        Ok(status_summary(&state, self.min_manual_documents))
    }
}

/// Keep `sandwich_status` pointing at the stage that was just entered
fn sync_sandwich_stage(state: &mut ProjectState, stage: Stage) {
    let status = state.sandwich_status.get_or_insert_with(SandwichStatus::default);
    status.current_stage = match stage {
        Stage::Stage1 => "stage1_foundation",
        Stage::Stage2 => crate::domain::STAGE2_COLLABORATION,
        Stage::Stage3 => "stage3_synthesis",
    }
    .to_string();
    if stage > Stage::Stage1 {
        status.stage1_complete = Some(true);
    }
}

fn status_summary(state: &ProjectState, min_manual: u64) -> StatusSummary {
    let progress_percent = match state.current_stage {
        Stage::Stage1 => {
            let need = min_manual.max(1) as f64;
            (state.documents_manually_coded as f64 / need * 100.0).min(100.0)
        }
        Stage::Stage2 => {
            let total = state.total_documents.max(1) as f64;
            50.0 + (state.documents_coded as f64 / total * 50.0).min(50.0)
        }
        Stage::Stage3 => 100.0,
    };

    StatusSummary {
        stage: state.current_stage,
        stage_name: state.current_stage.display_name().to_string(),
        progress_percent,
        documents_manually_coded: state.documents_manually_coded,
        documents_coded_total: state.documents_coded,
        memos_written: state.memos_written,
        codes_created: state.codes_created,
        stage1_complete: state.stage1_complete,
        tradition: state.tradition.clone(),
        last_updated: state.last_updated,
    }
}
