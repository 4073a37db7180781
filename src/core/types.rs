//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`FileState`] - Six-way classification of a tracked path
//! - [`Oid`] - Git blob object identifier (SHA)
//! - [`ProjectId`] - Numeric project identifier from the template
//!
//! # Validation
//!
//! [`Oid`] enforces validity at construction time. Invalid values cannot
//! be represented, so comparisons between Work and Production hashes can
//! never silently compare garbage.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric project identifier, used in the per-user settings path
/// (`~/.cccopy/<project_id>/config.ini`) and as the state-cache shard key.
pub type ProjectId = u64;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id: {0}")]
    InvalidOid(String),
}

/// The classification of a single project path, derived from comparing the
/// Work copy, the Production copy, and each tree's HEAD.
///
/// `Pending` is a display placeholder published by the refresh scheduler
/// before classification has run; the classifier itself never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    /// Work and Production content are identical.
    Same,
    /// The Work side carries a change Production does not have.
    Modified,
    /// The Production side carries a change Work does not have.
    Updated,
    /// Both sides changed relative to their own HEAD.
    Conflicted,
    /// The path exists in Production but not in Work.
    Deleted,
    /// Classification has not run yet for this row.
    Pending,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Same => "same",
            FileState::Modified => "modified",
            FileState::Updated => "updated",
            FileState::Conflicted => "conflicted",
            FileState::Deleted => "deleted",
            FileState::Pending => "pending",
        };
        write!(f, "{s}")
    }
}

/// A validated Git object identifier (40 hexadecimal characters).
///
/// Blob ids are the canonical content identifier for file comparisons:
/// two files have equal `Oid`s exactly when their bytes are equal.
///
/// # Example
///
/// ```
/// use cccopy::core::types::Oid;
///
/// let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
/// assert_eq!(oid.short(7), "abc123d");
///
/// assert!(Oid::new("not-a-sha").is_err());
/// assert!(Oid::new("abc123").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` unless the input is exactly 40
    /// hex characters (normalized to lowercase).
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into();
        if oid.len() != 40 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid.to_lowercase()))
    }

    /// The full 40-character hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated prefix for display.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> String {
        oid.0
    }
}
