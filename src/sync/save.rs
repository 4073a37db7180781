//! sync::save
//!
//! Commit the Work tree. No lock: the Work tree belongs to one user.

use tracing::info;

use crate::core::context::ProjectContext;

use super::{Operation, SyncError, SyncOutcome};

/// Stage everything in Work and commit it with the user's message.
/// The author comes from Work's own Git config.
pub fn save(ctx: &ProjectContext, message: &str) -> Result<SyncOutcome, SyncError> {
    let work = ctx.open_work()?;
    let touched = work.status_paths()?;

    work.stage_all()?;
    let oid = work.commit(message, None)?;
    info!(commit = %oid.short(12), files = touched.len(), "work tree saved");

    for path in &touched {
        ctx.state_cache.invalidate(ctx.config.project_id, path);
    }
    ctx.tracked_cache.invalidate_repo(&ctx.config.working_dir);

    let mut outcome = SyncOutcome::new(Operation::Save);
    outcome.copied = touched;
    outcome.commit = Some(oid);
    Ok(outcome)
}
