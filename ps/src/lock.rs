//! Advisory file locking
//!
//! Every reader and writer of a shared file takes a lock around its single
//! file handle for the duration of the read or write. Two implementations
//! sit behind the [`Locker`] trait:
//!
//! - [`NativeLocker`] uses OS advisory locks through `fs2` (flock on Unix,
//!   LockFileEx on Windows) and protects against other processes.
//! - [`ProcessLocker`] is an in-process `RwLock`. It only serializes threads
//!   holding the same locker, not independent process invocations.
//!
//! The implementation is picked once, at construction time, by [`detect`].

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LockError;

/// Lock mode requested for a critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers may hold the lock at once
    Shared,
    /// A single writer holds the lock
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Which locker to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockStrategy {
    /// Native if the platform supports it, otherwise in-process
    #[default]
    Auto,
    /// Always use OS advisory locks
    Native,
    /// Always use the in-process fallback
    Process,
}

/// Capability interface for locking a file handle
pub trait Locker: Send + Sync + fmt::Debug {
    /// Acquire a lock on `file`; it is released when the guard drops
    fn lock<'a>(&'a self, file: &'a File, path: &Path, mode: LockMode) -> Result<LockGuard<'a>, LockError>;

    /// True when the lock is visible to other processes
    fn is_native(&self) -> bool;
}

/// RAII guard returned by [`Locker::lock`]
///
/// Dropping the guard releases the lock, including on early returns and
/// error paths.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    inner: GuardInner<'a>,
}

enum GuardInner<'a> {
    Native(&'a File),
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

impl LockGuard<'_> {
    /// True when the guard came from the in-process fallback
    pub fn is_process_local(&self) -> bool {
        !matches!(self.inner, GuardInner::Native(_))
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let GuardInner::Native(file) = &self.inner
            && let Err(e) = fs2::FileExt::unlock(*file)
        {
            warn!(error = %e, "LockGuard::drop: failed to release native lock");
        }
    }
}

/// OS advisory locking through `fs2`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLocker;

impl Locker for NativeLocker {
    fn lock<'a>(&'a self, file: &'a File, path: &Path, mode: LockMode) -> Result<LockGuard<'a>, LockError> {
        debug!(?path, %mode, "NativeLocker::lock: called");
        let result = match mode {
            LockMode::Shared => fs2::FileExt::lock_shared(file),
            LockMode::Exclusive => fs2::FileExt::lock_exclusive(file),
        };
        result.map_err(|source| LockError::Acquire {
            mode,
            path: path.to_path_buf(),
            source,
        })?;
        Ok(LockGuard {
            inner: GuardInner::Native(file),
        })
    }

    fn is_native(&self) -> bool {
        true
    }
}

/// In-process fallback lock
///
/// Clones share the same underlying `RwLock`.
#[derive(Debug, Default, Clone)]
pub struct ProcessLocker {
    lock: Arc<RwLock<()>>,
}

impl ProcessLocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for ProcessLocker {
    fn lock<'a>(&'a self, _file: &'a File, path: &Path, mode: LockMode) -> Result<LockGuard<'a>, LockError> {
        debug!(?path, %mode, "ProcessLocker::lock: called");
        let inner = match mode {
            LockMode::Shared => GuardInner::Shared(self.lock.read().map_err(|_| LockError::Poisoned)?),
            LockMode::Exclusive => GuardInner::Exclusive(self.lock.write().map_err(|_| LockError::Poisoned)?),
        };
        Ok(LockGuard { inner })
    }

    fn is_native(&self) -> bool {
        false
    }
}

/// Whether this target has native advisory locking
pub fn native_locking_available() -> bool {
    cfg!(any(unix, windows))
}

/// Construct the locker for a strategy
pub fn detect(strategy: LockStrategy) -> Arc<dyn Locker> {
    debug!(?strategy, "detect: called");
    match strategy {
        LockStrategy::Native => Arc::new(NativeLocker),
        LockStrategy::Process => Arc::new(ProcessLocker::new()),
        LockStrategy::Auto if native_locking_available() => Arc::new(NativeLocker),
        LockStrategy::Auto => {
            warn!("Native file locking unavailable, falling back to in-process locking");
            Arc::new(ProcessLocker::new())
        }
    }
}

/// Locking capabilities of the running process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockingInfo {
    pub platform: String,
    pub native_locking_available: bool,
    pub native_locking_in_use: bool,
    pub fallback_mode: bool,
}

impl LockingInfo {
    pub fn for_locker(locker: &dyn Locker) -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            native_locking_available: native_locking_available(),
            native_locking_in_use: locker.is_native(),
            fallback_mode: !locker.is_native(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn temp_file(dir: &TempDir) -> (File, std::path::PathBuf) {
        let path = dir.path().join("locked.json");
        let file = File::create(&path).unwrap();
        (file, path)
    }

    #[test]
    fn test_native_exclusive_lock_and_release() {
        let dir = TempDir::new().unwrap();
        let (file, path) = temp_file(&dir);
        let locker = NativeLocker;

        {
            let guard = locker.lock(&file, &path, LockMode::Exclusive).unwrap();
            assert!(!guard.is_process_local());
        }

        // Released on drop, so a second handle can take it without blocking
        let other = File::open(&path).unwrap();
        fs2::FileExt::try_lock_exclusive(&other).unwrap();
        fs2::FileExt::unlock(&other).unwrap();
    }

    #[test]
    fn test_native_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let (file, path) = temp_file(&dir);
        let second = File::open(&path).unwrap();
        let locker = NativeLocker;

        let _a = locker.lock(&file, &path, LockMode::Shared).unwrap();
        let _b = locker.lock(&second, &path, LockMode::Shared).unwrap();
    }

    #[test]
    fn test_process_locker_serializes_writers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked.json");
        File::create(&path).unwrap();

        let locker = ProcessLocker::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locker = locker.clone();
                let path = path.clone();
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let file = File::open(&path).unwrap();
                    let _guard = locker.lock(&file, &path, LockMode::Exclusive).unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detect_honors_strategy() {
        assert!(detect(LockStrategy::Native).is_native());
        assert!(!detect(LockStrategy::Process).is_native());
        assert_eq!(detect(LockStrategy::Auto).is_native(), native_locking_available());
    }

    #[test]
    fn test_locking_info_reports_fallback() {
        let info = LockingInfo::for_locker(&ProcessLocker::new());
        assert!(info.fallback_mode);
        assert!(!info.native_locking_in_use);
    }
}
