//! sync::download
//!
//! Production → Work synchronization.
//!
//! Steps, all under the Production lock:
//!
//! 1. Bootstrap either repository on first contact: Work gets the user's
//!    identity; Production (inside a privilege scope) gets the fixed
//!    admin identity so authors alone record who changed what.
//! 2. Centralize ignore rules: Production's `.gitignore` is copied over
//!    Work's and Work's index is rebuilt under the new rules. Work never
//!    owns that file.
//! 3. Copy each `updated` path Production → Work. Paths Production holds
//!    that Work HEAD never recorded are copied too; they are the "new
//!    files from production" set. `conflicted` paths are left untouched
//!    and surfaced for the external diff tool.
//! 4. Auto-commit the new-file set in Work with a canned message.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::context::ProjectContext;
use crate::core::os;
use crate::core::types::FileState;
use crate::git::{GitError, GitTree, Identity};
use crate::lock::ProductionLock;
use crate::privilege::PrivilegeScope;
use crate::state::{classify, Recorder};

use super::{
    copy_between, enumerate_members, read_opt, Operation, SyncError, SyncOutcome,
    AUTO_SYNC_MESSAGE, PRODUCTION_LOCK,
};

/// Run the Download pipeline.
pub fn download(ctx: &ProjectContext, lock_timeout: Duration) -> Result<SyncOutcome, SyncError> {
    let _lock = ProductionLock::acquire(&ctx.storage, PRODUCTION_LOCK, lock_timeout)?;
    let mut outcome = SyncOutcome::new(Operation::Download);

    let work = open_or_init_work(ctx)?;
    let prod = open_or_init_production(ctx)?;

    // Ignore rules are owned by Production (step 2).
    let prod_ignore = read_opt(&ctx.config.production_dir.join(".gitignore"))?;
    let work_ignore = read_opt(&ctx.config.working_dir.join(".gitignore"))?;
    let mut ignore_refreshed = false;
    if let Some(bytes) = &prod_ignore {
        if work_ignore.as_deref() != Some(bytes.as_slice()) {
            copy_between(
                &ctx.config.production_dir,
                &ctx.config.working_dir,
                ".gitignore",
            )?;
            work.reset_index()?;
            ignore_refreshed = true;
            info!("ignore rules refreshed from production");
        }
    }

    let recorder = Recorder::new(&work, &prod, &ctx.tracked_cache);
    let mut new_files: Vec<String> = Vec::new();
    for path in enumerate_members(ctx) {
        let record = recorder.record(&path)?;
        let Some(state) = classify(&record) else {
            continue;
        };
        match state {
            FileState::Updated => {
                copy_between(&ctx.config.production_dir, &ctx.config.working_dir, &path)?;
                debug!(path = %path, "updated from production");
                outcome.copied.push(path);
            }
            // Present in Production, absent from Work, and never recorded
            // in Work HEAD: a file this user has not fetched yet. A path
            // Work HEAD does track was deleted locally on purpose and is
            // left deleted.
            FileState::Deleted if record.hash_work_head.is_none() => {
                copy_between(&ctx.config.production_dir, &ctx.config.working_dir, &path)?;
                debug!(path = %path, "new file from production");
                // Ignored files are copied but stay untracked, like any
                // other ignored file in a Git tree.
                if !work.is_ignored(&path)? {
                    new_files.push(path.clone());
                }
                outcome.copied.push(path);
            }
            FileState::Conflicted => {
                warn!(path = %path, "conflict; leaving working copy untouched");
                outcome.conflicts.push(path);
            }
            _ => {}
        }
    }

    // Step 4: the new-file set (plus a refreshed .gitignore) lands as one
    // automatic commit so the files count as fetched from now on.
    if ignore_refreshed {
        new_files.push(".gitignore".to_string());
    }
    if !new_files.is_empty() {
        match work.commit_paths(AUTO_SYNC_MESSAGE, &new_files, None) {
            Ok(oid) => {
                info!(commit = %oid.short(12), files = new_files.len(), "auto-committed new files");
                outcome.commit = Some(oid);
            }
            Err(GitError::NothingToCommit) => {}
            Err(e) => return Err(e.into()),
        }
    }

    ctx.invalidate_caches();
    if !outcome.conflicts.is_empty() {
        outcome.warnings.push(format!(
            "{} conflicted path(s) left for the diff tool",
            outcome.conflicts.len()
        ));
    }
    Ok(outcome)
}

fn open_or_init_work(ctx: &ProjectContext) -> Result<GitTree, SyncError> {
    if GitTree::is_repo(&ctx.config.working_dir) {
        Ok(ctx.open_work()?)
    } else {
        info!(dir = %ctx.config.working_dir.display(), "initializing work repository");
        let identity = Identity::for_user(&os::username());
        Ok(GitTree::init(&ctx.config.working_dir, &identity)?)
    }
}

fn open_or_init_production(ctx: &ProjectContext) -> Result<GitTree, SyncError> {
    if GitTree::is_repo(&ctx.config.production_dir) {
        Ok(ctx.open_production()?)
    } else {
        info!(dir = %ctx.config.production_dir.display(), "initializing production repository");
        let _scope = PrivilegeScope::enter(
            &ctx.config.upload_group,
            &ctx.audit,
            "initialize production repository",
        )?;
        let prod = GitTree::init(&ctx.config.production_dir, &Identity::production_admin())?;
        // Baseline whatever already lives in the shared tree so Production
        // HEAD reflects its content from the first session on.
        prod.stage_all()?;
        match prod.commit(
            "auto: initial import",
            Some(&Identity::for_user(&os::username())),
        ) {
            Ok(oid) => info!(commit = %oid.short(12), "production baseline committed"),
            Err(GitError::NothingToCommit) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(prod)
    }
}
