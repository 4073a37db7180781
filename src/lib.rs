//! cccopy - team collaboration over paired Git working trees
//!
//! cccopy lets many users edit one shared project on a shared filesystem
//! (NFS and friends) without a Git server. Each user has a private *Work*
//! tree; the team shares one *Production* tree. Users download Production
//! changes into Work, edit locally, and upload back under a
//! coarse-grained Production lock.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`cli`] - Command-line layer (parses args, maps errors to exit codes)
//! - [`sync`] - Download / Upload / Save pipelines
//! - [`refresh`] - Foreground scan + background classification workers
//! - [`state`] - Six-way path classification
//! - [`lock`] - NFS-safe directory lock with stale reclamation
//! - [`privilege`] - Scoped group elevation with an audit trail
//! - [`git`] - Single interface for all Git operations
//! - [`core`] - Domain types, configuration, caches, shared context
//! - [`ui`] - Output utilities
//!
//! # Correctness Invariants
//!
//! 1. Every Production write happens inside both the Production lock and
//!    a privilege scope
//! 2. Only Production commits carry an explicit author; the committer is
//!    always the fixed admin identity
//! 3. The project `.gitignore` is written only by the download pipeline
//! 4. Cache entries past their TTL are never served
//! 5. Classification results from a superseded refresh generation are
//!    discarded

pub mod cli;
pub mod core;
pub mod git;
pub mod lock;
pub mod privilege;
pub mod refresh;
pub mod state;
pub mod sync;
pub mod ui;
