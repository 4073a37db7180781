//! sync
//!
//! The Download / Upload / Save pipelines.
//!
//! # Architecture
//!
//! Each operation is an atomic sequence: acquire the Production lock
//! (Download, Upload), enter the privilege scope for Production writes
//! (Upload, and Production bootstrap inside Download), copy files
//! honoring the pattern set, and issue commits through the Git doorway.
//! Nesting is lock-outside, privilege-inside; both are RAII scopes, so
//! they release on every exit path before the caller sees the outcome.
//!
//! # Failure semantics
//!
//! A failure mid-pipeline unwinds without rolling back partial file
//! copies; the commit is simply not issued, Production HEAD is unchanged,
//! and a retry picks up the remaining work. All caches are invalidated
//! after every mutation.

mod download;
mod save;
mod upload;

pub use download::download;
pub use save::save;
pub use upload::upload;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::core::context::ProjectContext;
use crate::core::paths::STORAGE_DIR;
use crate::core::pattern::normalize_rel;
use crate::core::types::Oid;
use crate::git::GitError;
use crate::lock::LockError;
use crate::privilege::PrivilegeError;

/// Name of the single Production lock.
pub const PRODUCTION_LOCK: &str = "production";

/// Canned message for files materialized from Production.
pub const AUTO_SYNC_MESSAGE: &str = "auto: sync new files from production";

/// Canned message for direct edits found in Production.
pub const SALVAGE_MESSAGE: &str = "auto: salvage direct edits";

/// Errors from the sync pipelines.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },
}

/// Which pipeline produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Download,
    Upload,
    Save,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Download => "download",
            Operation::Upload => "upload",
            Operation::Save => "save",
        };
        write!(f, "{s}")
    }
}

/// The single result object a pipeline hands back after its lock and
/// privilege scopes have released.
#[derive(Debug)]
pub struct SyncOutcome {
    pub operation: Operation,
    /// Paths copied between the trees.
    pub copied: Vec<String>,
    /// Paths left untouched for the external diff tool.
    pub conflicts: Vec<String>,
    /// Human-readable warnings (gitignore restoration, salvage, ...).
    pub warnings: Vec<String>,
    /// The commit issued, when one was.
    pub commit: Option<Oid>,
}

impl SyncOutcome {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            copied: Vec::new(),
            conflicts: Vec::new(),
            warnings: Vec::new(),
            commit: None,
        }
    }
}

/// Every member path of the project: union over both trees of all files
/// matching the pattern set, sorted.
pub(crate) fn enumerate_members(ctx: &ProjectContext) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for root in [&ctx.config.working_dir, &ctx.config.production_dir] {
        if !root.exists() {
            continue;
        }
        let walk = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_internal(e));
        for entry in walk {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Unreadable entries on a shared filesystem are not
                    // fatal to enumeration.
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let rel = normalize_rel(rel);
            if ctx.patterns.is_member(&rel) {
                out.insert(rel);
            }
        }
    }
    out
}

fn is_internal(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && matches!(entry.file_name().to_str(), Some(".git") | Some(STORAGE_DIR))
}

/// Copy `rel` from one tree to the other, creating parent directories.
pub(crate) fn copy_between(
    from_root: &Path,
    to_root: &Path,
    rel: &str,
) -> Result<(), SyncError> {
    let from = from_root.join(rel);
    let to = to_root.join(rel);
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|source| SyncError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::copy(&from, &to).map_err(|source| SyncError::Io { path: to, source })?;
    Ok(())
}

/// Read a file's bytes, `None` when it does not exist.
pub(crate) fn read_opt(path: &Path) -> Result<Option<Vec<u8>>, SyncError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SyncError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
