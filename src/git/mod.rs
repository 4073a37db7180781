//! git
//!
//! Single interface for all Git operations.
//!
//! # Architecture
//!
//! This module is the **only doorway** to Git. Both working trees (Work
//! and Production) are driven through [`GitTree`]; no other module may
//! import `git2` or parse `.git` internals.
//!
//! # Responsibilities
//!
//! - Repository init/open with the imposed identity config
//! - Blob hashing (the canonical content identifier)
//! - HEAD tracked-set extraction
//! - Index staging, reset, and commits with explicit author/committer
//! - Porcelain-equivalent status
//! - Per-path history and blob-at-revision reads
//!
//! # Invariants
//!
//! - Callers never retry Git operations; retries are a pipeline concern
//! - Errors carry the failing operation name plus the backend diagnostic

mod interface;

pub use interface::{CommitInfo, GitError, GitTree, Identity};
