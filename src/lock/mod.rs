//! lock
//!
//! NFS-safe mutual exclusion via lock directories.
//!
//! # Architecture
//!
//! One Production lock per project; every mutating Production operation
//! serializes on it. The primitive is atomic directory creation, which
//! compliant NFS servers perform atomically, unlike `O_EXCL` opens or
//! `flock`. The directory holds an `owner` file recording
//! `host:pid:epoch_ms:user` so abandoned locks can be identified.
//!
//! # Reclamation
//!
//! An owner record older than 300 s marks the lock as abandoned; the next
//! acquirer removes the directory (best-effort, tolerating races with
//! other reclaimers) and retries immediately. A lock directory with an
//! unreadable owner record is aged by the directory's mtime instead.
//!
//! # Invariants
//!
//! - Release happens on every exit path (RAII guard; drop tolerates a
//!   lock already reclaimed by someone else)
//! - Acquisition backs off 100 ms doubling to a 1 s cap until `timeout`
//!
//! # Example
//!
//! ```ignore
//! let paths = StoragePaths::new(production_dir);
//! let lock = ProductionLock::acquire(&paths, "production", Duration::from_secs(30))?;
//! // ... mutate Production ...
//! drop(lock);
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::os;
use crate::core::paths::StoragePaths;

/// Age beyond which a lock directory is considered abandoned.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(300);

/// First retry sleep.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Retry sleep cap.
const BACKOFF_CAP: Duration = Duration::from_secs(1);

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock stayed held by a live owner for the whole budget.
    #[error("timed out acquiring lock '{name}' after {waited_ms} ms")]
    Timeout {
        /// The lock name
        name: String,
        /// How long we waited
        waited_ms: u128,
    },

    /// Filesystem error while creating or releasing the lock.
    #[error("lock i/o error on {path}: {source}")]
    Io {
        /// The path involved
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },
}

/// The owner record stored inside a lock directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub host: String,
    pub pid: u32,
    pub epoch_ms: i64,
    pub user: String,
}

impl LockOwner {
    /// An owner record for this process, stamped now.
    fn current() -> Self {
        Self {
            host: os::hostname(),
            pid: std::process::id(),
            epoch_ms: Utc::now().timestamp_millis(),
            user: os::username(),
        }
    }

    /// Serialize as the single `host:pid:epoch_ms:user` line.
    fn to_line(&self) -> String {
        format!("{}:{}:{}:{}\n", self.host, self.pid, self.epoch_ms, self.user)
    }

    /// Parse an owner line; `None` for malformed records.
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().splitn(4, ':');
        let host = fields.next()?.to_string();
        let pid = fields.next()?.parse().ok()?;
        let epoch_ms = fields.next()?.parse().ok()?;
        let user = fields.next()?.to_string();
        Some(Self {
            host,
            pid,
            epoch_ms,
            user,
        })
    }

    fn age(&self) -> Duration {
        let delta_ms = Utc::now().timestamp_millis() - self.epoch_ms;
        Duration::from_millis(delta_ms.max(0) as u64)
    }
}

/// Exclusive rights over a named Production resource.
///
/// Created by [`ProductionLock::acquire`]; the lock directory is removed
/// when the guard drops, on every exit path.
#[derive(Debug)]
pub struct ProductionLock {
    name: String,
    dir: PathBuf,
    owner_file: PathBuf,
    released: bool,
}

impl ProductionLock {
    /// Acquire the named lock, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] when a live owner holds the lock for the
    ///   whole budget
    /// - [`LockError::Io`] for filesystem failures other than contention
    pub fn acquire(
        paths: &StoragePaths,
        name: &str,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        let root = paths.lock_root();
        fs::create_dir_all(&root).map_err(|e| LockError::Io {
            path: root.clone(),
            source: e,
        })?;

        let dir = paths.lock_dir(name);
        let owner_file = paths.lock_owner_file(name);
        let started = Instant::now();
        let mut backoff = BACKOFF_INITIAL;

        loop {
            match fs::create_dir(&dir) {
                Ok(()) => {
                    let owner = LockOwner::current();
                    fs::write(&owner_file, owner.to_line()).map_err(|e| LockError::Io {
                        path: owner_file.clone(),
                        source: e,
                    })?;
                    debug!(lock = name, pid = owner.pid, "lock acquired");
                    return Ok(Self {
                        name: name.to_string(),
                        dir,
                        owner_file,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if Self::holder_is_stale(&dir, &owner_file) {
                        warn!(lock = name, "reclaiming abandoned lock");
                        // Races with other reclaimers are expected; the
                        // next create_dir settles who won.
                        let _ = fs::remove_file(&owner_file);
                        let _ = fs::remove_dir(&dir);
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(LockError::Timeout {
                            name: name.to_string(),
                            waited_ms: started.elapsed().as_millis(),
                        });
                    }
                    debug!(lock = name, backoff_ms = backoff.as_millis() as u64, "lock busy");
                    thread::sleep(backoff.min(timeout.saturating_sub(started.elapsed())));
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
                Err(e) => {
                    return Err(LockError::Io {
                        path: dir.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Whether the current holder's record is past the stale threshold.
    fn holder_is_stale(dir: &Path, owner_file: &Path) -> bool {
        if let Ok(text) = fs::read_to_string(owner_file) {
            if let Some(owner) = LockOwner::parse(&text) {
                return owner.age() > STALE_THRESHOLD;
            }
        }
        // Missing or corrupt owner record (e.g. a crash between mkdir and
        // write): fall back to the directory's own age.
        match fs::metadata(dir).and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age > STALE_THRESHOLD)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// The owner record currently on disk, if readable.
    pub fn owner(&self) -> Option<LockOwner> {
        fs::read_to_string(&self.owner_file)
            .ok()
            .and_then(|text| LockOwner::parse(&text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release explicitly. Tolerates a lock already reclaimed elsewhere.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // ENOENT here means a reclaimer beat us to it after a long stall;
        // nothing left to do either way.
        let _ = fs::remove_file(&self.owner_file);
        let _ = fs::remove_dir(&self.dir);
        debug!(lock = %self.name, "lock released");
    }
}

impl Drop for ProductionLock {
    fn drop(&mut self) {
        self.release();
    }
}
