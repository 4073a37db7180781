//! core::context
//!
//! Explicit shared state for a project session.
//!
//! # Design
//!
//! One [`ProjectContext`] is built at startup and passed (behind `Arc`)
//! into the refresh scheduler and the sync pipeline. There is no
//! process-wide mutable singleton: everything a component needs travels
//! through this value.
//!
//! Git trees are deliberately *not* held here. A repository handle is not
//! thread-safe, so each worker opens its own [`GitTree`] on demand; the
//! context only carries the thread-safe pieces (config, patterns, caches,
//! audit handle).

use crate::core::cache::{StateCache, TrackedCache};
use crate::core::config::ProjectConfig;
use crate::core::paths::StoragePaths;
use crate::core::pattern::PatternSet;
use crate::git::{GitError, GitTree};
use crate::privilege::AuditLog;

/// Shared, thread-safe session state for one project.
#[derive(Debug)]
pub struct ProjectContext {
    pub config: ProjectConfig,
    pub patterns: PatternSet,
    pub storage: StoragePaths,
    pub state_cache: StateCache,
    pub tracked_cache: TrackedCache,
    pub audit: AuditLog,
}

impl ProjectContext {
    pub fn new(config: ProjectConfig) -> Self {
        let patterns = PatternSet::new(&config.sources, &config.excludes);
        let storage = StoragePaths::new(config.production_dir.clone());
        let audit = AuditLog::new(storage.audit_log());
        Self {
            config,
            patterns,
            storage,
            state_cache: StateCache::new(),
            tracked_cache: TrackedCache::new(),
            audit,
        }
    }

    /// Open the per-user Work tree.
    pub fn open_work(&self) -> Result<GitTree, GitError> {
        GitTree::open(&self.config.working_dir)
    }

    /// Open the shared Production tree.
    pub fn open_production(&self) -> Result<GitTree, GitError> {
        GitTree::open(&self.config.production_dir)
    }

    /// Drop every cache entry for this project, both state rows and the
    /// tracked sets of both trees. The sync pipeline calls this after
    /// each mutation it performs.
    pub fn invalidate_caches(&self) {
        self.state_cache.invalidate_project(self.config.project_id);
        self.tracked_cache.invalidate_repo(&self.config.working_dir);
        self.tracked_cache.invalidate_repo(&self.config.production_dir);
    }
}
