//! core
//!
//! Core domain types, configuration, caches, and shared context.
//!
//! # Modules
//!
//! - [`types`] - Strong types: FileState, Oid, ProjectId
//! - [`config`] - Project template and settings-store loading
//! - [`paths`] - Centralized path routing for `.cccopy` storage
//! - [`pattern`] - Source/exclude pattern matching
//! - [`cache`] - TTL-bound state and tracked-set caches
//! - [`context`] - Explicit per-session shared state
//! - [`os`] - Process identity (user, host)
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - All shared state is explicit; no global singletons
//! - Cache reads never return expired entries

pub mod cache;
pub mod config;
pub mod context;
pub mod os;
pub mod paths;
pub mod pattern;
pub mod types;
