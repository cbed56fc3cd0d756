//! Coordinates safe access to one database file.
//!
//! Two layers. In-process, a readers-writer gate per storage handle lets
//! reads proceed concurrently with each other while writes are exclusive.
//! Across processes, an optional advisory lock file next to the database
//! file serializes write transactions between cooperating local clients:
//! acquisition atomically creates the file, waits up to a configured
//! timeout when another process holds it, and removal on drop guarantees
//! release on every exit path.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::error::{QuartError, Result};

/// Suffix appended to the database path to form the advisory lock path.
const LOCK_SUFFIX: &str = ".lock";

/// How long to sleep between acquisition attempts while the lock is held
/// elsewhere.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct ConcurrencyGuard {
    gate: RwLock<()>,
    file_lock: Option<FileLock>,
}

impl ConcurrencyGuard {
    pub fn new(db_path: &Path, use_filelock: bool, filelock_timeout: Duration) -> Self {
        let file_lock = use_filelock.then(|| FileLock {
            path: lock_path_for(db_path),
            timeout: filelock_timeout,
        });
        Self {
            gate: RwLock::new(()),
            file_lock,
        }
    }

    /// Shared access for reads. Held for the duration of a select.
    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Exclusive access for writes. Held for the duration of a transaction.
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    /// Acquire the cross-process lock, blocking the current thread.
    ///
    /// Must be called from a blocking context (the storage engine calls it
    /// inside the same `spawn_blocking` closure that runs the transaction,
    /// so the lock is held exactly as long as the transaction). Acquisition
    /// gives up without side effect once `cancelled` is set, so a caller
    /// that abandoned the operation while it was still waiting never gets a
    /// write. Returns `None` when the cross-process layer is disabled.
    pub(crate) fn acquire_file_lock(&self, cancelled: &AtomicBool) -> Result<Option<LockGuard>> {
        match &self.file_lock {
            Some(lock) => lock.acquire_blocking(cancelled).map(Some),
            None => Ok(None),
        }
    }

    pub fn lock_path(&self) -> Option<&Path> {
        self.file_lock.as_ref().map(|l| l.path.as_path())
    }

    /// The configured acquisition timeout, `None` when the cross-process
    /// layer is disabled.
    pub fn filelock_timeout(&self) -> Option<Duration> {
        self.file_lock.as_ref().map(|l| l.timeout)
    }
}

/// Advisory cross-process lock: a sibling file created atomically, honored
/// cooperatively by all participants, never read for application data.
struct FileLock {
    path: PathBuf,
    timeout: Duration,
}

impl FileLock {
    fn acquire_blocking(&self, cancelled: &AtomicBool) -> Result<LockGuard> {
        let started = Instant::now();
        loop {
            if cancelled.load(Ordering::Relaxed) {
                debug!(path = %self.path.display(), "lock wait abandoned by caller");
                return Err(QuartError::Connection(format!(
                    "abandoned while waiting for lock file '{}'",
                    self.path.display()
                )));
            }
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    // the payload is informational only
                    let _ = write!(file, "{}", std::process::id());
                    debug!(path = %self.path.display(), "acquired advisory lock");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= self.timeout {
                        warn!(
                            path = %self.path.display(),
                            waited_ms = started.elapsed().as_millis() as u64,
                            "advisory lock acquisition timed out"
                        );
                        return Err(QuartError::LockTimeout {
                            path: self.path.clone(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(QuartError::Connection(format!(
                        "could not create lock file '{}': {e}",
                        self.path.display()
                    )));
                }
            }
        }
    }
}

/// Held lock. Dropping removes the lock file, releasing on every exit path.
pub(crate) struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove lock file");
        } else {
            debug!(path = %self.path.display(), "released advisory lock");
        }
    }
}

pub(crate) fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(LOCK_SUFFIX);
    db_path.with_file_name(name)
}
