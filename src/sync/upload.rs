//! sync::upload
//!
//! Work → Production synchronization.
//!
//! Steps, under the Production lock with the privilege scope inside it:
//!
//! 1. Guard the central `.gitignore`: if Work's copy differs from
//!    Production's, Production's is restored on top of it and a warning
//!    is recorded; the rest of the upload proceeds.
//! 2. Salvage direct edits: uncommitted changes found in Production are
//!    committed first under the `direct-edit` author.
//! 3. Copy every `modified` path Work → Production, handing each copy to
//!    the upload group and making it group-writable.
//! 4. Commit with the user's message, author set to the invoking user;
//!    the committer stays the fixed admin identity.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::context::ProjectContext;
use crate::core::os;
use crate::core::types::FileState;
use crate::git::{GitError, Identity};
use crate::lock::ProductionLock;
use crate::privilege::PrivilegeScope;
use crate::state::Recorder;

use super::{
    copy_between, enumerate_members, read_opt, Operation, SyncError, SyncOutcome,
    PRODUCTION_LOCK, SALVAGE_MESSAGE,
};

/// Run the Upload pipeline.
pub fn upload(
    ctx: &ProjectContext,
    message: &str,
    lock_timeout: Duration,
) -> Result<SyncOutcome, SyncError> {
    let user = os::username();
    let _lock = ProductionLock::acquire(&ctx.storage, PRODUCTION_LOCK, lock_timeout)?;
    let work = ctx.open_work()?;
    let prod = ctx.open_production()?;
    let _scope = PrivilegeScope::enter(&ctx.config.upload_group, &ctx.audit, "upload to production")?;

    let mut outcome = SyncOutcome::new(Operation::Upload);

    // Step 1: the ignore file is Production's; a drifted Work copy is
    // overwritten, never propagated.
    let prod_ignore = read_opt(&ctx.config.production_dir.join(".gitignore"))?;
    let work_ignore = read_opt(&ctx.config.working_dir.join(".gitignore"))?;
    if work_ignore != prod_ignore {
        match &prod_ignore {
            Some(_) => copy_between(
                &ctx.config.production_dir,
                &ctx.config.working_dir,
                ".gitignore",
            )?,
            None => {
                let stray = ctx.config.working_dir.join(".gitignore");
                fs::remove_file(&stray).map_err(|source| SyncError::Io {
                    path: stray.clone(),
                    source,
                })?;
            }
        }
        warn!("working tree .gitignore differed from production; restored");
        outcome
            .warnings
            .push("working tree .gitignore differed from production; production's copy restored".into());
    }

    // Step 2: someone edited Production directly; keep their work.
    if !prod.status_paths()?.is_empty() {
        prod.stage_all()?;
        match prod.commit(SALVAGE_MESSAGE, Some(&Identity::for_user("direct-edit"))) {
            Ok(oid) => {
                warn!(commit = %oid.short(12), "salvaged direct edits in production");
                outcome
                    .warnings
                    .push("uncommitted direct edits in production were committed first".into());
            }
            Err(GitError::NothingToCommit) => {}
            Err(e) => return Err(e.into()),
        }
    }

    // Step 3: copy modified paths.
    let recorder = Recorder::new(&work, &prod, &ctx.tracked_cache);
    for path in enumerate_members(ctx) {
        if path == ".gitignore" {
            continue;
        }
        let Some(state) = recorder.classify_path(&path)? else {
            continue;
        };
        if state == FileState::Modified {
            copy_between(&ctx.config.working_dir, &ctx.config.production_dir, &path)?;
            grant_group_access(&ctx.config.production_dir.join(&path), &ctx.config.upload_group)?;
            debug!(path = %path, "uploaded");
            outcome.copied.push(path);
        }
    }

    // Step 4: one commit for the whole batch, authored by the user.
    if outcome.copied.is_empty() {
        outcome.warnings.push("nothing to upload".into());
    } else {
        prod.stage_all()?;
        match prod.commit(message, Some(&Identity::for_user(&user))) {
            Ok(oid) => {
                info!(commit = %oid.short(12), files = outcome.copied.len(), "uploaded to production");
                outcome.commit = Some(oid);
            }
            Err(GitError::NothingToCommit) => {}
            Err(e) => return Err(e.into()),
        }
    }

    ctx.invalidate_caches();
    Ok(outcome)
}

/// Hand a Production file to the upload group and make it group-writable.
fn grant_group_access(path: &Path, group: &str) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(Some(resolved)) = nix::unistd::Group::from_name(group) {
        // chown can fail on files another member owns; the mode bits
        // below are what actually keep the tree writable.
        if let Err(e) = nix::unistd::chown(path, None, Some(resolved.gid)) {
            debug!(path = %path.display(), error = %e, "chgrp skipped");
        }
    }
    let metadata = fs::metadata(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o060);
    fs::set_permissions(path, permissions).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
