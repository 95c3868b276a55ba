//! Public git mirror operations.
//!
//! The git mirror is a working copy with two remotes: the bzr bridge remote
//! (`bzr_origin`, backed by the local mirror root) and the public host
//! remote (`github`). Mirrored branches are named by slug. This module holds
//! the branch primitives; `sync` drives the per-branch mirroring steps and
//! `cleanup` removes branches no longer referenced by any open proposal.

pub mod cleanup;
pub mod sync;

use std::collections::BTreeSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::process::{run_command, ProcessError};
use crate::retry::RetryPolicy;

/// Name of the bzr bridge remote in the mirror working copy.
pub const BRIDGE_REMOTE: &str = "bzr_origin";

/// Name of the public host remote.
pub const PUBLIC_REMOTE: &str = "github";

/// Errors from git mirror operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A `git` invocation failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Refused to delete a protected branch.
    #[error("cannot delete protected branch {name}")]
    ProtectedBranch { name: String },
}

/// Result type for git mirror operations.
pub type GitResult<T> = Result<T, GitError>;

/// Configuration for the git mirror working copy.
#[derive(Debug, Clone)]
pub struct GitMirrorConfig {
    /// Path of the mirror working copy.
    pub workdir: PathBuf,

    /// Retry policy for the pull/push network legs.
    pub retry: RetryPolicy,
}

impl GitMirrorConfig {
    pub fn new(workdir: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        GitMirrorConfig {
            workdir: workdir.into(),
            retry,
        }
    }
}

/// Lists the local branch names of the mirror working copy.
pub fn branches(config: &GitMirrorConfig) -> GitResult<BTreeSet<String>> {
    let output = run_command(&["git", "branch"], &config.workdir)?;
    Ok(output
        .stdout
        .lines()
        .map(|line| line.trim_start_matches('*').trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Checks out a local branch.
pub fn checkout(config: &GitMirrorConfig, branch_name: &str) -> GitResult<()> {
    run_command(&["git", "checkout", branch_name], &config.workdir)?;
    Ok(())
}

/// Deletes a mirrored branch on the public host.
pub fn delete_remote_branch(config: &GitMirrorConfig, branch_name: &str) -> GitResult<()> {
    run_command(
        &[
            "git",
            "push",
            PUBLIC_REMOTE,
            &format!(":{}", branch_name),
        ],
        &config.workdir,
    )?;
    Ok(())
}

/// Deletes a local branch of the mirror working copy.
///
/// `master` is the mirror's home branch and is never deleted.
pub fn delete_local_branch(config: &GitMirrorConfig, branch_name: &str) -> GitResult<()> {
    if branch_name == "master" {
        return Err(GitError::ProtectedBranch {
            name: branch_name.to_string(),
        });
    }
    // A branch cannot be deleted while checked out.
    checkout(config, "master")?;
    run_command(&["git", "branch", "-D", branch_name], &config.workdir)?;
    Ok(())
}
