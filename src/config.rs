//! Run configuration: CLI arguments plus the JSON config file.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::types::BranchName;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "bunnybot", about = "Mirrors merge proposals into git and executes merge commands.")]
pub struct Args {
    /// Path to the JSON config file.
    #[arg(long, default_value = "data/config.json")]
    pub config: PathBuf,

    /// Refresh git mirrors even for branches whose revision did not change.
    #[arg(long)]
    pub always_update: bool,
}

/// Errors loading the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Where the cross-run snapshot lives.
    pub state_file: PathBuf,

    /// Shared repository root holding one source mirror per branch slug.
    pub bzr_repo: PathBuf,

    /// Git working copy wired to both the bridge remote and the public host.
    pub git_repo: PathBuf,

    /// Unique name of the trunk branch mirrored to the public `master`.
    pub master_mirrors: BranchName,

    /// Path to the OAuth credentials file for the review host.
    pub launchpad_credentials: PathBuf,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// The pidfile lives next to the snapshot.
    pub fn pidfile_path(&self) -> PathBuf {
        match self.state_file.parent() {
            Some(parent) => parent.join("bunnybot.pid"),
            None => PathBuf::from("bunnybot.pid"),
        }
    }
}
