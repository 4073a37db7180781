//! refresh::watcher
//!
//! Change detection for the Work tree.
//!
//! A single thread polls Work's status every poll period. Paths entering
//! or leaving the dirty set have their state-cache rows invalidated; the
//! ones inside the currently displayed directory are re-enqueued for
//! classification at the current generation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::core::context::ProjectContext;

use super::Task;

/// Granularity of stop-flag checks while waiting out the poll period.
const STOP_CHECK: Duration = Duration::from_millis(50);

/// The Work-tree change watcher thread.
pub struct ChangeWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    pub(crate) fn spawn(
        ctx: Arc<ProjectContext>,
        generation: Arc<AtomicU64>,
        current_dir: Arc<Mutex<Option<String>>>,
        task_tx: Sender<Task>,
        poll: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("cccopy-watcher".into())
            .spawn(move || watch_loop(ctx, generation, current_dir, task_tx, poll, stop_flag))
            .expect("spawn change watcher");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the thread and wait for it to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watch_loop(
    ctx: Arc<ProjectContext>,
    generation: Arc<AtomicU64>,
    current_dir: Arc<Mutex<Option<String>>>,
    task_tx: Sender<Task>,
    poll: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut previous: HashSet<String> = HashSet::new();
    let mut last_poll = Instant::now() - poll;
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        if last_poll.elapsed() < poll {
            thread::sleep(STOP_CHECK.min(poll));
            continue;
        }
        last_poll = Instant::now();

        let snapshot = match ctx.open_work().and_then(|work| work.status_paths()) {
            Ok(paths) => paths.into_iter().collect::<HashSet<_>>(),
            Err(e) => {
                // The Work tree may not exist yet (before the first
                // download); keep polling.
                debug!(error = %e, "watcher poll skipped");
                continue;
            }
        };

        let displayed = current_dir.lock().ok().and_then(|d| d.clone());
        for path in snapshot.symmetric_difference(&previous) {
            if !ctx.patterns.is_member(path) {
                continue;
            }
            debug!(path = %path, "work tree change detected");
            ctx.state_cache.invalidate(ctx.config.project_id, path);
            if let Some(dir) = &displayed {
                if parent_dir(path) == dir.as_str() {
                    let task = Task {
                        generation: generation.load(Ordering::SeqCst),
                        path: path.clone(),
                    };
                    if task_tx.send(task).is_err() {
                        warn!("task channel closed; watcher exiting");
                        return;
                    }
                }
            }
        }
        previous = snapshot;
    }
}

/// Directory part of a project-relative path (`""` for root entries).
fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProjectConfig;
    use crate::core::types::FileState;
    use crate::git::{GitTree, Identity};
    use crossbeam_channel::unbounded;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parent_dir_of_root_entry_is_empty() {
        assert_eq!(parent_dir("a.txt"), "");
        assert_eq!(parent_dir("src/a.txt"), "src");
        assert_eq!(parent_dir("src/x/a.txt"), "src/x");
    }

    #[test]
    fn change_invalidates_cache_and_reenqueues() {
        let tmp = TempDir::new().unwrap();
        let work = tmp.path().join("work");
        let prod = tmp.path().join("prod");
        GitTree::init(&work, &Identity::new("Test User", "test@example.com")).unwrap();
        GitTree::init(&prod, &Identity::production_admin()).unwrap();

        let ctx = Arc::new(ProjectContext::new(ProjectConfig {
            production_dir: prod,
            working_dir: work.clone(),
            sources: vec!["**".into()],
            excludes: vec![],
            upload_group: "users".into(),
            project_id: 1,
            log_path: None,
        }));

        // Stale row the watcher should evict once the file changes.
        ctx.state_cache.set(1, "a.txt", FileState::Same);

        let generation = Arc::new(AtomicU64::new(3));
        let current_dir = Arc::new(Mutex::new(Some(String::new())));
        let (task_tx, task_rx) = unbounded();

        fs::write(work.join("a.txt"), "dirty").unwrap();
        let watcher = ChangeWatcher::spawn(
            Arc::clone(&ctx),
            generation,
            current_dir,
            task_tx,
            Duration::from_millis(100),
        );

        let task = task_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("watcher enqueued a task");
        assert_eq!(task.path, "a.txt");
        assert_eq!(task.generation, 3);
        assert_eq!(ctx.state_cache.get(1, "a.txt"), None);

        watcher.stop();
    }
}
