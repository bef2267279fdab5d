//! Host-wide exclusive locks.
//!
//! Concurrent adb invocations are flaky, so every relay command of a run is
//! serialized behind one advisory lock file held for the whole process
//! lifetime. The sync status file uses the same mechanism to make its
//! check-and-copy atomic across concurrent invocations.
//!
//! Locks are exposed through the [`HostLock`] capability so tests can swap
//! the file lock for an in-process [`MemoryLock`].

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

/// Relay lock file name, shared with other copies of the exec wrapper.
pub const RELAY_LOCK_FILE: &str = "go_android_exec-adb-lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock {path}: {source}")]
    Acquire {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("in-memory lock poisoned")]
    Poisoned,

    #[error("lock task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// An exclusive lock held until the returned guard is dropped.
pub trait HostLock: Send + Sync {
    type Guard: Send;

    /// Block until the lock is held.
    fn acquire(&self) -> Result<Self::Guard, LockError>;
}

/// Acquire `lock` on the blocking pool so async callers keep their worker.
pub async fn acquire_async<L>(lock: L) -> Result<L::Guard, LockError>
where
    L: HostLock + 'static,
    L::Guard: 'static,
{
    tokio::task::spawn_blocking(move || lock.acquire()).await?
}

/// `flock(LOCK_EX)` on a well-known file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The relay lock inside `state_dir`.
    pub fn relay(state_dir: &Path) -> Self {
        Self::new(state_dir.join(RELAY_LOCK_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HostLock for FileLock {
    type Guard = FileLockGuard;

    fn acquire(&self) -> Result<FileLockGuard, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| LockError::Open {
                path: self.path.clone(),
                source,
            })?;
        debug!("waiting for lock {}", self.path.display());
        fs2::FileExt::lock_exclusive(&file).map_err(|source| LockError::Acquire {
            path: self.path.clone(),
            source,
        })?;
        debug!("acquired lock {}", self.path.display());
        Ok(FileLockGuard {
            file,
            path: self.path.clone(),
        })
    }
}

/// Holds the lock; the open file is available for reading and writing the
/// locked contents.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// In-process stand-in for [`FileLock`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLock {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.state.0.lock().map(|held| *held).unwrap_or(false)
    }
}

impl HostLock for MemoryLock {
    type Guard = MemoryLockGuard;

    fn acquire(&self) -> Result<MemoryLockGuard, LockError> {
        let (held, cvar) = &*self.state;
        let mut held = held.lock().map_err(|_| LockError::Poisoned)?;
        while *held {
            held = cvar.wait(held).map_err(|_| LockError::Poisoned)?;
        }
        *held = true;
        Ok(MemoryLockGuard {
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug)]
pub struct MemoryLockGuard {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        let (held, cvar) = &*self.state;
        if let Ok(mut held) = held.lock() {
            *held = false;
        }
        cvar.notify_one();
    }
}
