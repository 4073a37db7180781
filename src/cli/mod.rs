//! cli
//!
//! Command-line interface layer.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Load the project configuration (template or settings store)
//! - Delegate to the sync pipelines and the refresh scheduler
//! - Map pipeline outcomes to the documented exit codes
//!
//! # Exit codes
//!
//! - 0: success
//! - 1: other failure
//! - 2: production lock timeout
//! - 3: Git error
//! - 4: privilege restoration failure (raised inside the privilege scope)
//! - 5: configuration error

pub mod args;

pub use args::{Cli, Command};

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::{ConfigError, ProjectConfig};
use crate::core::context::ProjectContext;
use crate::core::types::FileState;
use crate::lock::LockError;
use crate::privilege::PrivilegeError;
use crate::refresh::{RefreshEvent, RefreshScheduler};
use crate::sync::{self, SyncError, SyncOutcome};
use crate::ui::output::{self, Verbosity};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_LOCK_TIMEOUT: i32 = 2;
pub const EXIT_GIT: i32 = 3;
pub const EXIT_CONFIG: i32 = 5;

/// Run the parsed CLI. Returns the process exit code.
pub fn run(cli: Cli) -> i32 {
    let verbosity = Verbosity::from_flags(cli.quiet, cli.debug);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            output::error(&e);
            return EXIT_CONFIG;
        }
    };
    let ctx = Arc::new(ProjectContext::new(config));
    let lock_timeout = Duration::from_secs(cli.lock_timeout);

    match cli.command {
        Command::Status { dir, settle } => run_status(
            ctx,
            dir.unwrap_or_default(),
            Duration::from_secs(settle),
            verbosity,
        ),
        Command::Download => finish(sync::download(&ctx, lock_timeout), verbosity),
        Command::Upload { message } => {
            finish(sync::upload(&ctx, &message, lock_timeout), verbosity)
        }
        Command::Save { message } => finish(sync::save(&ctx, &message), verbosity),
        Command::History {
            path,
            limit,
            production,
        } => run_history(&ctx, &path, limit, production, verbosity),
        Command::Show {
            path,
            rev,
            production,
        } => run_show(&ctx, &path, &rev, production),
    }
}

fn load_config(cli: &Cli) -> Result<ProjectConfig, ConfigError> {
    match (&cli.config, cli.project) {
        (Some(path), _) => ProjectConfig::load(path),
        (None, Some(id)) => ProjectConfig::load_settings(id),
        (None, None) => Err(ConfigError::InvalidValue {
            key: "--config".into(),
            message: "either --config or --project is required".into(),
        }),
    }
}

fn finish(result: Result<SyncOutcome, SyncError>, verbosity: Verbosity) -> i32 {
    match result {
        Ok(outcome) => {
            report(&outcome, verbosity);
            EXIT_SUCCESS
        }
        Err(e) => {
            output::error(&e);
            exit_code(&e)
        }
    }
}

fn report(outcome: &SyncOutcome, verbosity: Verbosity) {
    for warning in &outcome.warnings {
        output::warn(warning, verbosity);
    }
    for path in &outcome.copied {
        output::print(format!("copied      {path}"), verbosity);
    }
    for path in &outcome.conflicts {
        output::print(format!("conflict    {path}"), verbosity);
    }
    let commit = outcome
        .commit
        .as_ref()
        .map(|oid| format!(", commit {}", oid.short(12)))
        .unwrap_or_default();
    output::print(
        format!(
            "{}: {} file(s), {} conflict(s){}",
            outcome.operation,
            outcome.copied.len(),
            outcome.conflicts.len(),
            commit
        ),
        verbosity,
    );
}

fn exit_code(err: &SyncError) -> i32 {
    match err {
        SyncError::Lock(LockError::Timeout { .. }) => EXIT_LOCK_TIMEOUT,
        SyncError::Lock(_) => EXIT_FAILURE,
        SyncError::Git(_) => EXIT_GIT,
        SyncError::Privilege(PrivilegeError::UnknownGroup { .. }) => EXIT_CONFIG,
        SyncError::Privilege(_) => EXIT_FAILURE,
        SyncError::Io { .. } => EXIT_FAILURE,
    }
}

fn run_status(
    ctx: Arc<ProjectContext>,
    dir: String,
    settle: Duration,
    verbosity: Verbosity,
) -> i32 {
    let scheduler = RefreshScheduler::new(ctx);
    let rows = scheduler.refresh(&dir);

    let mut view: HashMap<String, FileState> =
        rows.iter().map(|r| (r.path.clone(), r.state)).collect();
    let mut pending: usize = rows
        .iter()
        .filter(|r| r.state == FileState::Pending)
        .count();

    let deadline = Instant::now() + settle;
    while pending > 0 && Instant::now() < deadline {
        let Ok(event) = scheduler
            .events()
            .recv_timeout(Duration::from_millis(200))
        else {
            continue;
        };
        if event.generation() < scheduler.generation() {
            continue;
        }
        match &event {
            RefreshEvent::Row { .. } | RefreshEvent::Gone { .. } => {
                pending = pending.saturating_sub(1);
            }
            RefreshEvent::Failed { path, message, .. } => {
                output::warn(format!("{path}: {message}"), verbosity);
                pending = pending.saturating_sub(1);
            }
        }
        scheduler.apply(&mut view, &event);
    }

    let mut entries: Vec<_> = view.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (path, state) in entries {
        output::print(format!("{:<11} {path}", state.to_string()), verbosity);
    }
    EXIT_SUCCESS
}

fn run_history(
    ctx: &ProjectContext,
    path: &str,
    limit: usize,
    production: bool,
    verbosity: Verbosity,
) -> i32 {
    let tree = if production {
        ctx.open_production()
    } else {
        ctx.open_work()
    };
    let tree = match tree {
        Ok(tree) => tree,
        Err(e) => {
            output::error(&e);
            return EXIT_GIT;
        }
    };
    match tree.history(Some(path), limit) {
        Ok(entries) => {
            for entry in entries {
                output::print(
                    format!(
                        "{}  {}  {} <{}>  {}",
                        entry.id.short(12),
                        entry.time.format("%Y-%m-%d %H:%M"),
                        entry.author_name,
                        entry.author_email,
                        entry.summary
                    ),
                    verbosity,
                );
            }
            EXIT_SUCCESS
        }
        Err(e) => {
            output::error(&e);
            EXIT_GIT
        }
    }
}

fn run_show(ctx: &ProjectContext, path: &str, rev: &str, production: bool) -> i32 {
    let tree = if production {
        ctx.open_production()
    } else {
        ctx.open_work()
    };
    let blob = tree.and_then(|tree| tree.blob_at(rev, path));
    match blob {
        Ok(Some(bytes)) => {
            if std::io::stdout().write_all(&bytes).is_err() {
                return EXIT_FAILURE;
            }
            EXIT_SUCCESS
        }
        Ok(None) => {
            output::error(format!("{path} does not exist at {rev}"));
            EXIT_FAILURE
        }
        Err(e) => {
            output::error(&e);
            EXIT_GIT
        }
    }
}
