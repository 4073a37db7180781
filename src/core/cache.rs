//! core::cache
//!
//! In-memory caches backing the refresh scheduler and sync pipeline.
//!
//! # Design
//!
//! Two caches, both TTL-bound and explicitly invalidated by the sync
//! pipeline after every mutation it performs:
//!
//! - [`StateCache`]: `(project_id, path)` → classified state, TTL 300 s.
//!   Sharded by project id so refreshes of different projects do not
//!   contend on one mutex.
//! - [`TrackedCache`]: `(repo, HEAD)` → path→blob map, TTL 60 s. Keying
//!   by HEAD means a commit naturally misses the stale entry.
//!
//! Expired entries are never returned; a stale entry is recomputed by the
//! caller and overwritten.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::core::types::{FileState, Oid, ProjectId};

/// State entries expire after this many seconds.
const STATE_TTL_SECS: i64 = 300;

/// Tracked-set entries expire after this many seconds.
const TRACKED_TTL_SECS: i64 = 60;

/// Number of state-cache shards.
const SHARDS: usize = 16;

#[derive(Debug, Clone)]
struct StateEntry {
    state: FileState,
    computed_at: DateTime<Utc>,
}

impl StateEntry {
    fn is_expired(&self) -> bool {
        Utc::now() - self.computed_at > Duration::seconds(STATE_TTL_SECS)
    }
}

/// Cache of classified path states, keyed by `(project_id, path)`.
#[derive(Debug)]
pub struct StateCache {
    shards: Vec<Mutex<HashMap<(ProjectId, String), StateEntry>>>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, project_id: ProjectId) -> &Mutex<HashMap<(ProjectId, String), StateEntry>> {
        &self.shards[(project_id as usize) % SHARDS]
    }

    /// Cached state for a path, if present and fresh.
    pub fn get(&self, project_id: ProjectId, path: &str) -> Option<FileState> {
        let shard = self.shard(project_id).lock().ok()?;
        shard
            .get(&(project_id, path.to_string()))
            .filter(|e| !e.is_expired())
            .map(|e| e.state)
    }

    /// Record a freshly computed state.
    pub fn set(&self, project_id: ProjectId, path: &str, state: FileState) {
        if let Ok(mut shard) = self.shard(project_id).lock() {
            shard.insert(
                (project_id, path.to_string()),
                StateEntry {
                    state,
                    computed_at: Utc::now(),
                },
            );
        }
    }

    /// Drop one path's entry.
    pub fn invalidate(&self, project_id: ProjectId, path: &str) {
        if let Ok(mut shard) = self.shard(project_id).lock() {
            shard.remove(&(project_id, path.to_string()));
        }
    }

    /// Drop every entry belonging to a project.
    pub fn invalidate_project(&self, project_id: ProjectId) {
        if let Ok(mut shard) = self.shard(project_id).lock() {
            shard.retain(|(id, _), _| *id != project_id);
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedEntry {
    map: Arc<HashMap<String, Oid>>,
    cached_at: DateTime<Utc>,
}

impl TrackedEntry {
    fn is_expired(&self) -> bool {
        Utc::now() - self.cached_at > Duration::seconds(TRACKED_TTL_SECS)
    }
}

/// Cache of a repository's HEAD tracked set (path → recorded blob id).
#[derive(Debug, Default)]
pub struct TrackedCache {
    entries: Mutex<HashMap<(PathBuf, Oid), TrackedEntry>>,
}

impl TrackedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh tracked map for `(repo, head)` if cached.
    pub fn get(&self, repo: &Path, head: &Oid) -> Option<Arc<HashMap<String, Oid>>> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(&(repo.to_path_buf(), head.clone()))
            .filter(|e| !e.is_expired())
            .map(|e| Arc::clone(&e.map))
    }

    /// Store the tracked map computed for `(repo, head)`.
    pub fn set(&self, repo: &Path, head: &Oid, map: HashMap<String, Oid>) -> Arc<HashMap<String, Oid>> {
        let map = Arc::new(map);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                (repo.to_path_buf(), head.clone()),
                TrackedEntry {
                    map: Arc::clone(&map),
                    cached_at: Utc::now(),
                },
            );
        }
        map
    }

    /// Drop every entry for a repository, whatever HEAD it was keyed by.
    pub fn invalidate_repo(&self, repo: &Path) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(r, _), _| r != repo);
        }
    }
}
