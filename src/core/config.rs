//! core::config
//!
//! Project template loading and per-project settings consumption.
//!
//! # Overview
//!
//! A project is described by an INI template:
//!
//! ```ini
//! [CONFIG]
//! PRODUCTION_DIR = /shared/projects/widget
//! WORKING_DIR = ~/work/widget
//! PROJECT_ID = 17
//!
//! [SOURCES]
//! 1 = src/**
//! 2 = docs/**/*.md
//!
//! [EXCLUDES]
//! 1 = **/*.tmp
//!
//! [UPLOAD]
//! GROUP = widgetdev
//!
//! [LOG]
//! PATH = ~/.cccopy/widget.log
//! ```
//!
//! `[SOURCES]` and `[EXCLUDES]` use numbered keys; entries are applied in
//! numeric order. Path values support `~`, `${VAR}`, and `$VAR` expansion.
//!
//! When no template path is given, the per-project settings store at
//! `<home>/.cccopy/<project_id>/config.ini` is consulted. That store is
//! consumed, not owned: this module never writes it.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::core::types::ProjectId;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read template '{path}': {message}")]
    ReadError { path: PathBuf, message: String },

    #[error("template '{path}' is missing section [{section}]")]
    MissingSection { path: PathBuf, section: String },

    #[error("template '{path}' is missing key {key} in [{section}]")]
    MissingKey {
        path: PathBuf,
        section: String,
        key: String,
    },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to expand '{value}': {message}")]
    Expansion { value: String, message: String },

    #[error("home directory not found")]
    NoHomeDir,
}

/// Immutable per-session project configuration.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Shared multi-user tree.
    pub production_dir: PathBuf,
    /// Per-user tree.
    pub working_dir: PathBuf,
    /// Ordered include patterns.
    pub sources: Vec<String>,
    /// Ordered exclude patterns.
    pub excludes: Vec<String>,
    /// OS group granting write access on Production.
    pub upload_group: String,
    /// Numeric identifier used in the settings-store path and cache keys.
    pub project_id: ProjectId,
    /// Optional log file location from `[LOG] PATH`.
    pub log_path: Option<PathBuf>,
}

impl ProjectConfig {
    /// Load a project template from `path`.
    ///
    /// # Errors
    ///
    /// Any missing required section/key, unparseable value, or failed
    /// path expansion maps to a [`ConfigError`] (exit code 5 at the CLI).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini, path)
    }

    /// Load configuration from the per-project settings store,
    /// `<home>/.cccopy/<project_id>/config.ini`.
    pub fn load_settings(project_id: ProjectId) -> Result<Self, ConfigError> {
        let path = settings_store_path(project_id)?;
        Self::load(&path)
    }

    fn from_ini(ini: &Ini, path: &Path) -> Result<Self, ConfigError> {
        let config = section(ini, path, "CONFIG")?;

        let production_dir = expand_path(require(config, path, "CONFIG", "PRODUCTION_DIR")?)?;
        let working_dir = expand_path(require(config, path, "CONFIG", "WORKING_DIR")?)?;
        let project_id: ProjectId = require(config, path, "CONFIG", "PROJECT_ID")?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "PROJECT_ID".into(),
                message: "must be a non-negative integer".into(),
            })?;

        if production_dir == working_dir {
            return Err(ConfigError::InvalidValue {
                key: "WORKING_DIR".into(),
                message: "working and production directories must differ".into(),
            });
        }

        let sources = numbered_values(ini, "SOURCES");
        let sources = if sources.is_empty() {
            vec!["**".to_string()]
        } else {
            sources
        };
        let excludes = numbered_values(ini, "EXCLUDES");

        let upload = section(ini, path, "UPLOAD")?;
        let upload_group = require(upload, path, "UPLOAD", "GROUP")?.trim().to_string();

        let log_path = ini
            .section(Some("LOG"))
            .and_then(|s| s.get("PATH"))
            .map(expand_path)
            .transpose()?;

        Ok(Self {
            production_dir,
            working_dir,
            sources,
            excludes,
            upload_group,
            project_id,
            log_path,
        })
    }
}

/// Path of the per-project settings store (consumed, not owned).
pub fn settings_store_path(project_id: ProjectId) -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home
        .join(".cccopy")
        .join(project_id.to_string())
        .join("config.ini"))
}

fn section<'a>(ini: &'a Ini, path: &Path, name: &str) -> Result<&'a ini::Properties, ConfigError> {
    ini.section(Some(name))
        .ok_or_else(|| ConfigError::MissingSection {
            path: path.to_path_buf(),
            section: name.to_string(),
        })
}

fn require<'a>(
    props: &'a ini::Properties,
    path: &Path,
    section: &str,
    key: &str,
) -> Result<&'a str, ConfigError> {
    props.get(key).ok_or_else(|| ConfigError::MissingKey {
        path: path.to_path_buf(),
        section: section.to_string(),
        key: key.to_string(),
    })
}

/// Collect the numbered keys of a section in numeric order.
///
/// Non-numeric keys are ignored; ties cannot occur because keys are unique
/// within a section.
fn numbered_values(ini: &Ini, name: &str) -> Vec<String> {
    let Some(props) = ini.section(Some(name)) else {
        return Vec::new();
    };
    let mut entries: Vec<(u64, String)> = props
        .iter()
        .filter_map(|(k, v)| k.trim().parse::<u64>().ok().map(|n| (n, v.to_string())))
        .collect();
    entries.sort_by_key(|(n, _)| *n);
    entries.into_iter().map(|(_, v)| v).collect()
}

/// Expand `~`, `${VAR}`, and `$VAR` in a path value.
fn expand_path(value: &str) -> Result<PathBuf, ConfigError> {
    let expanded = shellexpand::full(value.trim()).map_err(|e| ConfigError::Expansion {
        value: value.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}
