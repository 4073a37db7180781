//! refresh
//!
//! Partial-refresh scheduling: fast foreground scan, background
//! classification, generation-based cancellation.
//!
//! # Architecture
//!
//! A refresh request for a directory runs in two phases:
//!
//! 1. **Foreground scan** - non-recursive enumeration of the directory's
//!    children in *both* trees, filtered by the pattern set. Rows are
//!    published immediately with their cached state, or `Pending` when
//!    the cache misses.
//! 2. **Background classification** - a fixed pool of worker threads
//!    consumes a FIFO of `(generation, path)` tasks, classifies each path
//!    and posts a [`RefreshEvent`] onto the result channel.
//!
//! Every refresh bumps a generation counter. Tasks and events carry the
//! generation they were created under; workers drop tasks from older
//! generations and [`RefreshScheduler::apply`] drops stale events, so a
//! superseded refresh can never overwrite newer rows.
//!
//! Workers never call back into the UI; the UI drains the event channel.
//! A watcher thread polls the Work tree's status and re-enqueues changed
//! paths inside the displayed directory at the current generation.

mod watcher;

pub use watcher::ChangeWatcher;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::core::context::ProjectContext;
use crate::core::pattern::normalize_rel;
use crate::core::types::FileState;
use crate::state::Recorder;

/// Refresh generation counter value.
pub type Generation = u64;

/// Default number of classification workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Default poll period of the change watcher.
pub const DEFAULT_POLL: Duration = Duration::from_secs(5);

/// One displayed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub path: String,
    pub state: FileState,
}

/// A classification task handed to the worker pool.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub generation: Generation,
    pub path: String,
}

/// Typed result posted by workers onto the event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    /// A path was classified.
    Row {
        generation: Generation,
        path: String,
        state: FileState,
    },
    /// The path vanished from both trees while the refresh was running.
    Gone {
        generation: Generation,
        path: String,
    },
    /// Classification failed; the row keeps its previous state.
    Failed {
        generation: Generation,
        path: String,
        message: String,
    },
}

impl RefreshEvent {
    pub fn generation(&self) -> Generation {
        match self {
            RefreshEvent::Row { generation, .. }
            | RefreshEvent::Gone { generation, .. }
            | RefreshEvent::Failed { generation, .. } => *generation,
        }
    }
}

/// The refresh scheduler: owns the worker pool and the watcher.
pub struct RefreshScheduler {
    ctx: Arc<ProjectContext>,
    generation: Arc<AtomicU64>,
    current_dir: Arc<Mutex<Option<String>>>,
    task_tx: Option<Sender<Task>>,
    event_rx: Receiver<RefreshEvent>,
    workers: Vec<JoinHandle<()>>,
    watcher: Option<ChangeWatcher>,
}

impl RefreshScheduler {
    /// Start the scheduler with default worker count and poll period.
    pub fn new(ctx: Arc<ProjectContext>) -> Self {
        Self::with_options(ctx, DEFAULT_WORKERS, DEFAULT_POLL)
    }

    /// Start the scheduler with explicit sizing (tests shrink the poll
    /// period).
    pub fn with_options(ctx: Arc<ProjectContext>, workers: usize, poll: Duration) -> Self {
        let (task_tx, task_rx) = unbounded::<Task>();
        let (event_tx, event_rx) = unbounded::<RefreshEvent>();
        let generation = Arc::new(AtomicU64::new(0));
        let current_dir = Arc::new(Mutex::new(None));

        let handles = (0..workers.max(1))
            .map(|id| {
                let ctx = Arc::clone(&ctx);
                let task_rx = task_rx.clone();
                let event_tx = event_tx.clone();
                let generation = Arc::clone(&generation);
                thread::Builder::new()
                    .name(format!("cccopy-classify-{id}"))
                    .spawn(move || worker_loop(ctx, task_rx, event_tx, generation))
                    .expect("spawn classification worker")
            })
            .collect();

        let watcher = ChangeWatcher::spawn(
            Arc::clone(&ctx),
            Arc::clone(&generation),
            Arc::clone(&current_dir),
            task_tx.clone(),
            poll,
        );

        Self {
            ctx,
            generation,
            current_dir,
            task_tx: Some(task_tx),
            event_rx,
            workers: handles,
            watcher: Some(watcher),
        }
    }

    /// The latest refresh generation.
    pub fn generation(&self) -> Generation {
        self.generation.load(Ordering::SeqCst)
    }

    /// The channel the UI drains for classification results.
    pub fn events(&self) -> &Receiver<RefreshEvent> {
        &self.event_rx
    }

    /// Start a new refresh of `dir` (project-relative, `""` for the
    /// root). Supersedes any refresh still in flight.
    ///
    /// Returns the foreground rows; classification results follow on the
    /// event channel.
    pub fn refresh(&self, dir: &str) -> Vec<Row> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut current) = self.current_dir.lock() {
            *current = Some(dir.to_string());
        }
        debug!(dir, generation, "refresh started");

        let mut rows = Vec::new();
        for path in self.scan(dir) {
            let cached = self
                .ctx
                .state_cache
                .get(self.ctx.config.project_id, &path);
            let state = cached.unwrap_or(FileState::Pending);
            if cached.is_none() {
                self.enqueue(Task {
                    generation,
                    path: path.clone(),
                });
            }
            rows.push(Row { path, state });
        }
        rows
    }

    /// Apply an event to a row view, dropping events from superseded
    /// generations.
    pub fn apply(&self, view: &mut HashMap<String, FileState>, event: &RefreshEvent) {
        if event.generation() < self.generation() {
            debug!(?event, "discarding stale refresh result");
            return;
        }
        match event {
            RefreshEvent::Row { path, state, .. } => {
                view.insert(path.clone(), *state);
            }
            RefreshEvent::Gone { path, .. } => {
                view.remove(path);
            }
            RefreshEvent::Failed { path, message, .. } => {
                warn!(path = %path, message = %message, "classification failed");
            }
        }
    }

    fn enqueue(&self, task: Task) {
        if let Some(tx) = &self.task_tx {
            let _ = tx.send(task);
        }
    }

    /// Union of the immediate children of `dir` in both trees, filtered
    /// by the pattern set, as sorted project-relative paths.
    fn scan(&self, dir: &str) -> Vec<String> {
        let mut names = BTreeSet::new();
        for root in [&self.ctx.config.working_dir, &self.ctx.config.production_dir] {
            let base = if dir.is_empty() {
                root.clone()
            } else {
                root.join(dir)
            };
            let Ok(entries) = fs::read_dir(&base) else {
                continue;
            };
            for entry in entries.flatten() {
                let rel_path = if dir.is_empty() {
                    entry.file_name().into()
                } else {
                    Path::new(dir).join(entry.file_name())
                };
                let rel = normalize_rel(&rel_path);
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let keep = if is_dir {
                    self.ctx.patterns.may_contain(&rel)
                } else {
                    self.ctx.patterns.is_member(&rel)
                };
                if keep {
                    names.insert(rel);
                }
            }
        }
        names.into_iter().collect()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        // Stop the watcher first; it holds a task sender clone.
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        // Closing the channel ends the worker loops.
        self.task_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    ctx: Arc<ProjectContext>,
    task_rx: Receiver<Task>,
    event_tx: Sender<RefreshEvent>,
    generation: Arc<AtomicU64>,
) {
    while let Ok(task) = task_rx.recv() {
        if task.generation < generation.load(Ordering::SeqCst) {
            debug!(path = %task.path, "skipping superseded task");
            continue;
        }
        let event = classify_task(&ctx, &task);
        if event_tx.send(event).is_err() {
            return;
        }
    }
}

fn classify_task(ctx: &ProjectContext, task: &Task) -> RefreshEvent {
    let outcome = (|| {
        let work = ctx.open_work()?;
        let prod = ctx.open_production()?;
        let recorder = Recorder::new(&work, &prod, &ctx.tracked_cache);
        recorder.classify_path(&task.path)
    })();
    match outcome {
        Ok(Some(state)) => {
            ctx.state_cache
                .set(ctx.config.project_id, &task.path, state);
            RefreshEvent::Row {
                generation: task.generation,
                path: task.path.clone(),
                state,
            }
        }
        Ok(None) => {
            ctx.state_cache.invalidate(ctx.config.project_id, &task.path);
            RefreshEvent::Gone {
                generation: task.generation,
                path: task.path.clone(),
            }
        }
        Err(e) => RefreshEvent::Failed {
            generation: task.generation,
            path: task.path.clone(),
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProjectConfig;
    use crate::git::{GitTree, Identity};
    use std::time::Instant;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        ctx: Arc<ProjectContext>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().expect("tempdir");
            let work = tmp.path().join("work");
            let prod = tmp.path().join("prod");
            GitTree::init(&work, &Identity::new("Test User", "test@example.com"))
                .expect("init work");
            GitTree::init(&prod, &Identity::production_admin()).expect("init prod");
            let ctx = Arc::new(ProjectContext::new(ProjectConfig {
                production_dir: prod,
                working_dir: work,
                sources: vec!["**".into()],
                excludes: vec!["**/*.tmp".into()],
                upload_group: "users".into(),
                project_id: 1,
                log_path: None,
            }));
            Self { _tmp: tmp, ctx }
        }

        fn write_work(&self, rel: &str, content: &str) {
            let path = self.ctx.config.working_dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn write_prod(&self, rel: &str, content: &str) {
            let path = self.ctx.config.production_dir.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn scheduler(&self) -> RefreshScheduler {
            RefreshScheduler::with_options(Arc::clone(&self.ctx), 2, Duration::from_secs(3600))
        }
    }

    /// Drain events until `view` holds `expected` non-pending rows.
    fn settle(
        scheduler: &RefreshScheduler,
        view: &mut HashMap<String, FileState>,
        expected: usize,
    ) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while view.len() < expected && Instant::now() < deadline {
            if let Ok(event) = scheduler
                .events()
                .recv_timeout(Duration::from_millis(200))
            {
                scheduler.apply(view, &event);
            }
        }
    }

    #[test]
    fn scan_lists_union_of_both_trees() {
        let fx = Fixture::new();
        fx.write_work("a.txt", "A");
        fx.write_prod("b.txt", "B");
        let scheduler = fx.scheduler();

        let rows = scheduler.refresh("");
        let paths: Vec<_> = rows.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
        assert!(rows.iter().all(|r| r.state == FileState::Pending));
    }

    #[test]
    fn excluded_paths_are_not_listed() {
        let fx = Fixture::new();
        fx.write_work("keep.txt", "K");
        fx.write_work("drop.tmp", "D");
        let scheduler = fx.scheduler();

        let rows = scheduler.refresh("");
        let paths: Vec<_> = rows.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    #[test]
    fn background_classification_resolves_pending_rows() {
        let fx = Fixture::new();
        fx.write_work("local.txt", "L");
        fx.write_prod("remote.txt", "R");
        let scheduler = fx.scheduler();

        scheduler.refresh("");
        let mut view = HashMap::new();
        settle(&scheduler, &mut view, 2);

        assert_eq!(view.get("local.txt"), Some(&FileState::Modified));
        assert_eq!(view.get("remote.txt"), Some(&FileState::Deleted));
    }

    #[test]
    fn fresh_cache_entries_skip_classification() {
        let fx = Fixture::new();
        fx.write_work("a.txt", "A");
        fx.ctx.state_cache.set(1, "a.txt", FileState::Same);
        let scheduler = fx.scheduler();

        let rows = scheduler.refresh("");
        assert_eq!(rows[0].state, FileState::Same);
    }

    #[test]
    fn subdirectory_refresh_lists_children() {
        let fx = Fixture::new();
        fx.write_work("src/a.txt", "A");
        fx.write_prod("src/b.txt", "B");
        let scheduler = fx.scheduler();

        let rows = scheduler.refresh("src");
        let paths: Vec<_> = rows.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.txt", "src/b.txt"]);
    }

    #[test]
    fn stale_generation_never_mutates_view() {
        let fx = Fixture::new();
        fx.write_work("a.txt", "A");
        let scheduler = fx.scheduler();

        scheduler.refresh("");
        let old_generation = scheduler.generation();
        scheduler.refresh("");

        let mut view = HashMap::new();
        let stale = RefreshEvent::Row {
            generation: old_generation,
            path: "a.txt".into(),
            state: FileState::Conflicted,
        };
        scheduler.apply(&mut view, &stale);
        assert!(view.is_empty());

        let current = RefreshEvent::Row {
            generation: scheduler.generation(),
            path: "a.txt".into(),
            state: FileState::Modified,
        };
        scheduler.apply(&mut view, &current);
        assert_eq!(view.get("a.txt"), Some(&FileState::Modified));
    }

    #[test]
    fn gone_event_removes_row() {
        let fx = Fixture::new();
        let scheduler = fx.scheduler();
        scheduler.refresh("");

        let mut view = HashMap::new();
        view.insert("ghost.txt".to_string(), FileState::Pending);
        let gone = RefreshEvent::Gone {
            generation: scheduler.generation(),
            path: "ghost.txt".into(),
        };
        scheduler.apply(&mut view, &gone);
        assert!(view.is_empty());
    }
}
