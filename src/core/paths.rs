//! core::paths
//!
//! Centralized path routing for cccopy storage locations.
//!
//! # Storage Layout
//!
//! All coordination state lives under `<production_dir>/.cccopy/`:
//! - `lock/<name>.lockdir/owner` - lock directories (one per operation name)
//! - `audit.log` - append-only privilege audit trail
//!
//! No code outside this module computes `.cccopy` joins; everything goes
//! through [`StoragePaths`].
//!
//! # Example
//!
//! ```
//! use cccopy::core::paths::StoragePaths;
//! use std::path::PathBuf;
//!
//! let paths = StoragePaths::new(PathBuf::from("/shared/widget"));
//! assert_eq!(
//!     paths.lock_dir("production"),
//!     PathBuf::from("/shared/widget/.cccopy/lock/production.lockdir")
//! );
//! ```

use std::path::{Path, PathBuf};

/// Name of the coordination directory at the Production root.
pub const STORAGE_DIR: &str = ".cccopy";

/// Centralized path routing for the shared coordination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    production_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(production_dir: PathBuf) -> Self {
        Self { production_dir }
    }

    /// The coordination root, `<production_dir>/.cccopy`.
    pub fn storage_root(&self) -> PathBuf {
        self.production_dir.join(STORAGE_DIR)
    }

    /// Parent directory of all lock directories.
    pub fn lock_root(&self) -> PathBuf {
        self.storage_root().join("lock")
    }

    /// The lock directory for a named resource.
    pub fn lock_dir(&self, name: &str) -> PathBuf {
        self.lock_root().join(format!("{name}.lockdir"))
    }

    /// The owner file inside a lock directory.
    pub fn lock_owner_file(&self, name: &str) -> PathBuf {
        self.lock_dir(name).join("owner")
    }

    /// The append-only audit trail for privilege elevations.
    pub fn audit_log(&self) -> PathBuf {
        self.storage_root().join("audit.log")
    }

    pub fn production_dir(&self) -> &Path {
        &self.production_dir
    }
}
