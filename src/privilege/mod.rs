//! privilege
//!
//! Scoped group elevation for Production writes, with an audit trail.
//!
//! # Architecture
//!
//! Writing into the shared Production tree requires membership of the
//! project's upload group. [`PrivilegeScope::enter`] switches the
//! process's effective group for the duration of a scope and restores it
//! when the scope drops, on every exit path including panics. Work-side
//! operations must never run inside this scope.
//!
//! # Audit
//!
//! Every entry, exit, and restoration failure appends one JSON line to
//! the audit log immediately; lines are never buffered.
//!
//! # Invariants
//!
//! - A failed restoration is fatal: the process logs the failure and
//!   terminates with [`RESTORE_FAILURE_EXIT`]. Continuing with an
//!   elevated effective group is never acceptable.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::core::os;

/// Process exit code for a failed group restoration.
pub const RESTORE_FAILURE_EXIT: i32 = 4;

/// Errors from privilege operations.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// The upload group does not exist on this host.
    #[error("unknown group '{group}'")]
    UnknownGroup {
        /// The group name from the project template
        group: String,
    },

    /// The group switch itself failed (typically: not a member).
    #[error("failed to switch effective group to '{group}': {message}")]
    Elevation {
        /// The target group
        group: String,
        /// The underlying error text
        message: String,
    },

    /// The audit line could not be appended; elevation refuses to proceed
    /// unaudited.
    #[error("failed to append audit record to {path}: {source}")]
    Audit {
        /// The audit log path
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },
}

/// One audit event, serialized as a JSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum AuditRecord<'a> {
    Enter {
        actor: &'a str,
        target_group: &'a str,
        reason: &'a str,
        ts: DateTime<Utc>,
    },
    Exit {
        actor: &'a str,
        target_group: &'a str,
        ts: DateTime<Utc>,
        duration_ms: u128,
    },
    RestoreFailure {
        actor: &'a str,
        target_group: &'a str,
        ts: DateTime<Utc>,
        message: &'a str,
    },
}

/// Append-only audit trail.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &AuditRecord<'_>) -> Result<(), PrivilegeError> {
        let append_inner = || -> io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let line = serde_json::to_string(record)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{line}")?;
            file.flush()
        };
        append_inner().map_err(|source| PrivilegeError::Audit {
            path: self.path.clone(),
            source,
        })
    }
}

/// An elevated region. Created by [`PrivilegeScope::enter`]; the previous
/// effective group returns when this drops.
#[derive(Debug)]
pub struct PrivilegeScope<'a> {
    audit: &'a AuditLog,
    actor: String,
    group: String,
    previous: nix::unistd::Gid,
    entered: Instant,
    restored: bool,
}

impl<'a> PrivilegeScope<'a> {
    /// Switch the effective group to `group` for the lifetime of the
    /// returned scope, recording the elevation in `audit`.
    ///
    /// # Errors
    ///
    /// - [`PrivilegeError::UnknownGroup`] if the group cannot be resolved
    /// - [`PrivilegeError::Audit`] if the entry record cannot be appended
    /// - [`PrivilegeError::Elevation`] if the switch fails
    pub fn enter(
        group: &str,
        audit: &'a AuditLog,
        reason: &str,
    ) -> Result<Self, PrivilegeError> {
        let resolved = nix::unistd::Group::from_name(group)
            .ok()
            .flatten()
            .ok_or_else(|| PrivilegeError::UnknownGroup {
                group: group.to_string(),
            })?;
        let previous = nix::unistd::getegid();
        let actor = os::username();

        audit.append(&AuditRecord::Enter {
            actor: &actor,
            target_group: group,
            reason,
            ts: Utc::now(),
        })?;

        nix::unistd::setegid(resolved.gid).map_err(|e| PrivilegeError::Elevation {
            group: group.to_string(),
            message: e.to_string(),
        })?;
        debug!(group, "effective group elevated");

        Ok(Self {
            audit,
            actor,
            group: group.to_string(),
            previous,
            entered: Instant::now(),
            restored: false,
        })
    }

    /// The gid that will be restored on exit.
    pub fn previous_gid(&self) -> nix::unistd::Gid {
        self.previous
    }
}

impl Drop for PrivilegeScope<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        match nix::unistd::setegid(self.previous) {
            Ok(()) => {
                // Exit lines are best-effort: the scope has already ended
                // and Drop has no error channel.
                let _ = self.audit.append(&AuditRecord::Exit {
                    actor: &self.actor,
                    target_group: &self.group,
                    ts: Utc::now(),
                    duration_ms: self.entered.elapsed().as_millis(),
                });
                debug!(group = %self.group, "effective group restored");
            }
            Err(e) => {
                let message = e.to_string();
                let _ = self.audit.append(&AuditRecord::RestoreFailure {
                    actor: &self.actor,
                    target_group: &self.group,
                    ts: Utc::now(),
                    message: &message,
                });
                error!(group = %self.group, %message, "failed to restore effective group");
                // The process must not keep running with an elevated
                // effective group.
                std::process::exit(RESTORE_FAILURE_EXIT);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn audit_in(dir: &TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("audit.log"))
    }

    /// Name of a group the test process can always switch to: its own.
    fn own_group() -> String {
        let gid = nix::unistd::getegid();
        nix::unistd::Group::from_gid(gid)
            .expect("group lookup")
            .expect("current group exists")
            .name
    }

    #[test]
    fn unknown_group_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let audit = audit_in(&tmp);
        let err = PrivilegeScope::enter("cccopy-no-such-group", &audit, "test").unwrap_err();
        assert!(matches!(err, PrivilegeError::UnknownGroup { .. }));
    }

    #[test]
    fn group_restored_after_normal_exit() {
        let tmp = TempDir::new().unwrap();
        let audit = audit_in(&tmp);
        let before = nix::unistd::getegid();

        {
            let scope = PrivilegeScope::enter(&own_group(), &audit, "test").expect("enter");
            assert_eq!(scope.previous_gid(), before);
        }
        assert_eq!(nix::unistd::getegid(), before);
    }

    #[test]
    fn group_restored_after_panic() {
        let tmp = TempDir::new().unwrap();
        let audit = audit_in(&tmp);
        let before = nix::unistd::getegid();

        let result = std::panic::catch_unwind(|| {
            let _scope = PrivilegeScope::enter(&own_group(), &audit, "test").expect("enter");
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(nix::unistd::getegid(), before);
    }

    #[test]
    fn audit_records_enter_and_exit() {
        let tmp = TempDir::new().unwrap();
        let audit = audit_in(&tmp);

        {
            let _scope =
                PrivilegeScope::enter(&own_group(), &audit, "upload src/a.txt").expect("enter");
        }

        let text = std::fs::read_to_string(audit.path()).expect("audit file");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let enter: serde_json::Value = serde_json::from_str(lines[0]).expect("enter json");
        assert_eq!(enter["event"], "enter");
        assert_eq!(enter["reason"], "upload src/a.txt");
        assert_eq!(enter["actor"], os::username());

        let exit: serde_json::Value = serde_json::from_str(lines[1]).expect("exit json");
        assert_eq!(exit["event"], "exit");
        assert!(exit["duration_ms"].is_number());
    }

    #[test]
    fn audit_lines_accumulate_across_scopes() {
        let tmp = TempDir::new().unwrap();
        let audit = audit_in(&tmp);

        for _ in 0..3 {
            let _scope = PrivilegeScope::enter(&own_group(), &audit, "repeat").expect("enter");
        }
        let text = std::fs::read_to_string(audit.path()).expect("audit file");
        assert_eq!(text.lines().count(), 6);
    }
}
