//! End-to-end tests for the sync pipelines against real repositories.
//!
//! Each test builds a throwaway project: a Production tree and a Work
//! tree under one temp directory, with the current user's own group as
//! the upload group so privilege scopes are exercised without requiring
//! extra memberships.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use cccopy::core::config::ProjectConfig;
use cccopy::core::context::ProjectContext;
use cccopy::core::types::FileState;
use cccopy::git::GitTree;
use cccopy::state::Recorder;
use cccopy::sync;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// The test process's own group name (always switchable-to).
fn own_group() -> String {
    let output = Command::new("id").arg("-gn").output().expect("id -gn");
    String::from_utf8(output.stdout).expect("group name").trim().to_string()
}

struct Project {
    _tmp: TempDir,
    ctx: ProjectContext,
}

impl Project {
    fn new() -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let production_dir = tmp.path().join("prod");
        let working_dir = tmp.path().join("work");
        fs::create_dir_all(&production_dir).expect("mkdir prod");
        fs::create_dir_all(&working_dir).expect("mkdir work");
        let ctx = ProjectContext::new(ProjectConfig {
            production_dir,
            working_dir,
            sources: vec!["**".into()],
            excludes: vec![],
            upload_group: own_group(),
            project_id: 1,
            log_path: None,
        });
        Self { _tmp: tmp, ctx }
    }

    fn write_prod(&self, rel: &str, content: &str) {
        write(&self.ctx.config.production_dir, rel, content);
    }

    fn write_work(&self, rel: &str, content: &str) {
        write(&self.ctx.config.working_dir, rel, content);
    }

    fn read_prod(&self, rel: &str) -> String {
        fs::read_to_string(self.ctx.config.production_dir.join(rel)).expect("read prod file")
    }

    fn read_work(&self, rel: &str) -> String {
        fs::read_to_string(self.ctx.config.working_dir.join(rel)).expect("read work file")
    }

    fn download(&self) -> sync::SyncOutcome {
        sync::download(&self.ctx, LOCK_TIMEOUT).expect("download")
    }

    fn upload(&self, message: &str) -> sync::SyncOutcome {
        sync::upload(&self.ctx, message, LOCK_TIMEOUT).expect("upload")
    }

    fn state_of(&self, rel: &str) -> Option<FileState> {
        let work = self.ctx.open_work().expect("open work");
        let prod = self.ctx.open_production().expect("open prod");
        Recorder::new(&work, &prod, &self.ctx.tracked_cache)
            .classify_path(rel)
            .expect("classify")
    }

    fn work_commit_count(&self) -> usize {
        GitTree::open(&self.ctx.config.working_dir)
            .expect("open work")
            .history(None, 100)
            .expect("history")
            .len()
    }

    fn prod_commit_count(&self) -> usize {
        GitTree::open(&self.ctx.config.production_dir)
            .expect("open prod")
            .history(None, 100)
            .expect("history")
            .len()
    }

    /// Simulate another user committing directly in Production.
    fn commit_in_prod(&self, message: &str) {
        let prod = GitTree::open(&self.ctx.config.production_dir).expect("open prod");
        prod.stage_all().expect("stage prod");
        prod.commit(message, None).expect("commit prod");
        self.ctx.invalidate_caches();
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

// =============================================================================
// Scenario: fresh bootstrap
// =============================================================================

#[test]
fn fresh_bootstrap_materializes_production_files() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");

    let outcome = project.download();

    assert_eq!(project.read_work("src/a.txt"), "A");
    assert_eq!(outcome.copied, vec!["src/a.txt"]);
    assert!(outcome.conflicts.is_empty());
    assert_eq!(project.work_commit_count(), 1);
    assert_eq!(project.state_of("src/a.txt"), Some(FileState::Same));
}

#[test]
fn bootstrap_creates_both_repositories_with_their_identities() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    let work = GitTree::open(&project.ctx.config.working_dir).expect("work repo");
    let prod = GitTree::open(&project.ctx.config.production_dir).expect("prod repo");
    assert_eq!(prod.identity().unwrap().name, "cccopy_admin");
    assert_eq!(prod.identity().unwrap().email, "admin@cccopy.com");
    assert!(work.identity().unwrap().email.ends_with("@cccopy.com"));
}

#[test]
fn download_is_idempotent() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");

    project.download();
    let commits_after_first = project.work_commit_count();
    let second = project.download();

    assert!(second.copied.is_empty());
    assert!(second.commit.is_none());
    assert_eq!(project.work_commit_count(), commits_after_first);
}

// =============================================================================
// Scenario: local edit and upload
// =============================================================================

#[test]
fn local_edit_is_modified_then_uploaded() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    project.write_work("src/a.txt", "A'");
    assert_eq!(project.state_of("src/a.txt"), Some(FileState::Modified));

    let before = project.prod_commit_count();
    let outcome = project.upload("m1");

    assert_eq!(project.read_prod("src/a.txt"), "A'");
    assert_eq!(outcome.copied, vec!["src/a.txt"]);
    assert!(outcome.commit.is_some());
    assert_eq!(project.prod_commit_count(), before + 1);
}

#[test]
fn production_commits_carry_user_author_and_admin_committer() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();
    project.write_work("src/a.txt", "A'");
    project.upload("m1");

    let prod = GitTree::open(&project.ctx.config.production_dir).expect("prod repo");
    let head = &prod.history(None, 1).expect("history")[0];

    let user = cccopy::core::os::username();
    assert_eq!(head.author_name, user);
    assert_eq!(head.author_email, format!("{user}@cccopy.com"));
    assert_eq!(head.committer_name, "cccopy_admin");
    assert_eq!(head.committer_email, "admin@cccopy.com");
    assert_eq!(head.summary, "m1");
}

#[test]
fn new_local_file_is_uploaded() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    project.write_work("src/b.txt", "B");
    assert_eq!(project.state_of("src/b.txt"), Some(FileState::Modified));
    let outcome = project.upload("add b");

    assert_eq!(project.read_prod("src/b.txt"), "B");
    assert_eq!(outcome.copied, vec!["src/b.txt"]);
}

#[test]
fn upload_with_no_changes_warns_and_commits_nothing() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    let before = project.prod_commit_count();
    let outcome = project.upload("nothing");

    assert!(outcome.copied.is_empty());
    assert!(outcome.commit.is_none());
    assert!(outcome.warnings.iter().any(|w| w.contains("nothing")));
    assert_eq!(project.prod_commit_count(), before);
}

// =============================================================================
// Scenario: remote update
// =============================================================================

#[test]
fn remote_update_is_updated_then_downloaded() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    // Another user advances Production.
    project.write_prod("src/a.txt", "A''");
    project.commit_in_prod("remote change");

    assert_eq!(project.state_of("src/a.txt"), Some(FileState::Updated));

    let commits_before = project.work_commit_count();
    let outcome = project.download();

    assert_eq!(project.read_work("src/a.txt"), "A''");
    assert_eq!(outcome.copied, vec!["src/a.txt"]);
    assert_eq!(project.state_of("src/a.txt"), Some(FileState::Same));
    // An updated copy is not a new file; no auto-commit.
    assert_eq!(project.work_commit_count(), commits_before);
}

// =============================================================================
// Scenario: conflict
// =============================================================================

#[test]
fn double_sided_edit_conflicts_and_work_is_preserved() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    project.write_work("src/a.txt", "X");
    project.write_prod("src/a.txt", "Y");

    assert_eq!(project.state_of("src/a.txt"), Some(FileState::Conflicted));

    let commits_before = project.work_commit_count();
    let outcome = project.download();

    assert_eq!(outcome.conflicts, vec!["src/a.txt"]);
    assert!(outcome.copied.is_empty());
    assert_eq!(project.read_work("src/a.txt"), "X");
    assert_eq!(project.work_commit_count(), commits_before);
    assert!(!outcome.warnings.is_empty());
}

// =============================================================================
// Scenario: stale lock
// =============================================================================

#[test]
fn download_reclaims_a_stale_lock() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");

    // A crashed process left the lock behind 400 s ago.
    let lock_dir = project.ctx.storage.lock_dir("production");
    fs::create_dir_all(&lock_dir).expect("mkdir lockdir");
    let stale_epoch = chrono::Utc::now().timestamp_millis() - 400_000;
    fs::write(
        project.ctx.storage.lock_owner_file("production"),
        format!("deadhost:4242:{stale_epoch}:ghost\n"),
    )
    .expect("write owner");

    let started = Instant::now();
    let outcome = project.download();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.copied, vec!["src/a.txt"]);
    // The lock was released again after the pipeline finished.
    assert!(!lock_dir.exists());
}

// =============================================================================
// Scenario: gitignore guard
// =============================================================================

#[test]
fn download_centralizes_the_ignore_file() {
    let project = Project::new();
    project.write_prod(".gitignore", "*.log\n");
    project.write_prod("src/a.txt", "A");
    project.write_prod("debug.log", "noise");

    project.download();

    assert_eq!(project.read_work(".gitignore"), "*.log\n");
    // Ignored production files still copy over; ignore rules govern Git
    // tracking, not file membership.
    assert_eq!(project.read_work("debug.log"), "noise");
    let work = GitTree::open(&project.ctx.config.working_dir).expect("work repo");
    let tracked = work.tracked_at_head().expect("tracked");
    assert!(tracked.contains_key(".gitignore"));
    assert!(tracked.contains_key("src/a.txt"));
    assert!(!tracked.contains_key("debug.log"));
}

#[test]
fn upload_restores_a_drifted_ignore_file() {
    let project = Project::new();
    project.write_prod(".gitignore", "*.log\n");
    project.write_prod("src/a.txt", "A");
    project.download();

    let prod_ignore_before = project.read_prod(".gitignore");
    project.write_work(".gitignore", "*.log\n*.tmp\n");
    project.write_work("src/a.txt", "A'");

    let outcome = project.upload("m");

    // Production's copy is byte-identical to its pre-upload content and
    // Work's drifted copy was replaced.
    assert_eq!(project.read_prod(".gitignore"), prod_ignore_before);
    assert_eq!(project.read_work(".gitignore"), prod_ignore_before);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains(".gitignore")));
    // The other modified file still went up in the same operation.
    assert_eq!(project.read_prod("src/a.txt"), "A'");
    assert_eq!(outcome.copied, vec!["src/a.txt"]);
}

// =============================================================================
// Direct edits, deletions, save
// =============================================================================

#[test]
fn upload_salvages_direct_production_edits() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    // Someone edits Production behind cccopy's back.
    project.write_prod("src/direct.txt", "hand edit");

    project.write_work("src/a.txt", "A'");
    project.upload("m");

    let prod = GitTree::open(&project.ctx.config.production_dir).expect("prod repo");
    let log = prod.history(None, 10).expect("history");
    let salvage = log
        .iter()
        .find(|c| c.summary == "auto: salvage direct edits")
        .expect("salvage commit present");
    assert_eq!(salvage.author_name, "direct-edit");
    // The salvage commit precedes the upload commit.
    assert_eq!(log[0].summary, "m");
}

#[test]
fn local_deletion_is_not_resurrected_by_download() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.write_prod("src/b.txt", "B");
    project.download();

    fs::remove_file(project.ctx.config.working_dir.join("src/b.txt")).expect("delete");
    project.ctx.invalidate_caches();
    assert_eq!(project.state_of("src/b.txt"), Some(FileState::Deleted));

    let outcome = project.download();
    assert!(outcome.copied.is_empty());
    assert!(!project.ctx.config.working_dir.join("src/b.txt").exists());
}

#[test]
fn save_commits_the_work_tree() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();

    project.write_work("src/a.txt", "A'");
    let outcome = sync::save(&project.ctx, "local checkpoint").expect("save");

    assert!(outcome.commit.is_some());
    let work = GitTree::open(&project.ctx.config.working_dir).expect("work repo");
    let head = &work.history(None, 1).expect("history")[0];
    assert_eq!(head.summary, "local checkpoint");
    // Save never touches Production.
    assert_eq!(project.read_prod("src/a.txt"), "A");
}

#[test]
fn excluded_paths_never_cross_the_trees() {
    let tmp = TempDir::new().expect("tempdir");
    let production_dir = tmp.path().join("prod");
    let working_dir = tmp.path().join("work");
    fs::create_dir_all(&production_dir).unwrap();
    fs::create_dir_all(&working_dir).unwrap();
    let ctx = ProjectContext::new(ProjectConfig {
        production_dir,
        working_dir,
        sources: vec!["src/**".into()],
        excludes: vec!["**/*.secret".into()],
        upload_group: own_group(),
        project_id: 2,
        log_path: None,
    });
    write(&ctx.config.production_dir, "src/a.txt", "A");
    write(&ctx.config.production_dir, "src/key.secret", "sssh");
    write(&ctx.config.production_dir, "notes.md", "outside sources");

    let outcome = sync::download(&ctx, LOCK_TIMEOUT).expect("download");

    assert_eq!(outcome.copied, vec!["src/a.txt"]);
    assert!(!ctx.config.working_dir.join("src/key.secret").exists());
    assert!(!ctx.config.working_dir.join("notes.md").exists());
}

#[test]
fn privilege_elevations_are_audited() {
    let project = Project::new();
    project.write_prod("src/a.txt", "A");
    project.download();
    project.write_work("src/a.txt", "A'");
    project.upload("m");

    let audit = fs::read_to_string(project.ctx.storage.audit_log()).expect("audit log");
    let events: Vec<serde_json::Value> = audit
        .lines()
        .map(|l| serde_json::from_str(l).expect("audit line is json"))
        .collect();
    // At least: production init enter/exit, upload enter/exit.
    assert!(events.len() >= 4);
    assert!(events.iter().any(|e| e["event"] == "enter"));
    assert!(events.iter().any(|e| e["event"] == "exit"));
}
