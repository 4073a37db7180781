//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! - `--config <TEMPLATE>`: project template (INI) to load
//! - `--project <ID>`: read `~/.cccopy/<ID>/config.ini` instead
//! - `--lock-timeout <SECS>`: budget for acquiring the production lock
//! - `--debug`: verbose diagnostics
//! - `--quiet` / `-q`: minimal output

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cccopy - shared-project synchronization over paired Git trees
#[derive(Parser, Debug)]
#[command(name = "cccopy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project template (INI) describing the production and working trees
    #[arg(long, global = true, value_name = "TEMPLATE")]
    pub config: Option<PathBuf>,

    /// Project id; loads the per-user settings store when --config is absent
    #[arg(long, global = true, value_name = "ID")]
    pub project: Option<u64>,

    /// Seconds to wait for the production lock
    #[arg(long, global = true, default_value_t = 30, value_name = "SECS")]
    pub lock_timeout: u64,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the state of every entry in a project directory
    Status {
        /// Project-relative directory (defaults to the project root)
        dir: Option<String>,

        /// Seconds to wait for background classification
        #[arg(long, default_value_t = 30, value_name = "SECS")]
        settle: u64,
    },

    /// Synchronize production into the working tree
    Download,

    /// Synchronize working-tree changes into production
    Upload {
        /// Commit message for the production commit
        #[arg(short, long)]
        message: String,
    },

    /// Commit the working tree locally
    Save {
        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Show the commit history of one path
    History {
        /// Project-relative path
        path: String,

        /// Maximum number of entries
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        /// Read production's history instead of the working tree's
        #[arg(long)]
        production: bool,
    },

    /// Print a path's content at a revision
    Show {
        /// Project-relative path
        path: String,

        /// Revision to read
        #[arg(long, default_value = "HEAD")]
        rev: String,

        /// Read from production instead of the working tree
        #[arg(long)]
        production: bool,
    },
}
