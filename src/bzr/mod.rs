//! Local mirror operations against the source VCS (Bazaar).
//!
//! Every branch referenced by an open proposal gets a checkout under the
//! mirror root, named by its slug. Operations shell out to `bzr` and either
//! succeed or fail with the captured command line and output. Only the
//! network legs (pull, push) are wrapped by the retry policy; local-only
//! operations fail fast.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::process::{run_command, ProcessError};
use crate::retry::{classify_process_error, RetryPolicy};
use crate::types::Branch;

/// Errors from source-VCS mirror operations.
#[derive(Debug, Error)]
pub enum BzrError {
    /// A `bzr` invocation failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// An operation required an existing mirror checkout.
    #[error("branch {name} has no mirror checkout yet")]
    NotBranched { name: String },

    /// `bzr revno` produced something that is not a revision number.
    #[error("unparseable revno output: {output:?}")]
    BadRevno { output: String },
}

/// Result type for source-VCS operations.
pub type BzrResult<T> = Result<T, BzrError>;

/// Configuration for the source-VCS mirror.
#[derive(Debug, Clone)]
pub struct BzrConfig {
    /// Shared mirror root; one subdirectory per branch slug.
    pub mirror_root: PathBuf,

    /// Retry policy for the pull/push network legs.
    pub retry: RetryPolicy,
}

impl BzrConfig {
    pub fn new(mirror_root: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        BzrConfig {
            mirror_root: mirror_root.into(),
            retry,
        }
    }

    /// Returns the mirror checkout path for a branch.
    pub fn branch_path(&self, branch: &Branch) -> PathBuf {
        self.mirror_root.join(branch.slug.as_str())
    }

    /// Whether the branch already has a mirror checkout.
    pub fn is_branched(&self, branch: &Branch) -> bool {
        self.branch_path(branch).is_dir()
    }
}

/// Creates the shared mirror root if it does not exist yet.
///
/// Returns true when the repository was freshly initialised (the caller then
/// registers the git bridge remote, see `git::sync`).
pub fn ensure_mirror_root(config: &BzrConfig) -> BzrResult<bool> {
    if config.mirror_root.is_dir() {
        return Ok(false);
    }
    let root = config.mirror_root.to_string_lossy().into_owned();
    run_command(&["bzr", "init-repo", &root], Path::new("."))?;
    Ok(true)
}

/// Clones the remote branch into its mirror checkout.
pub fn branch(config: &BzrConfig, branch: &Branch) -> BzrResult<()> {
    run_command(
        &[
            "bzr",
            "branch",
            &format!("lp:{}", branch.name),
            branch.slug.as_str(),
        ],
        &config.mirror_root,
    )?;
    Ok(())
}

/// Discards local modifications and unversioned files in the checkout.
pub fn revert(config: &BzrConfig, branch: &Branch) -> BzrResult<()> {
    let path = config.branch_path(branch);
    run_command(&["bzr", "revert"], &path)?;
    run_command(
        &["bzr", "clean-tree", "--unknown", "--detritus", "--force"],
        &path,
    )?;
    Ok(())
}

/// Current revision number of the mirror checkout.
///
/// Requires the branch to be checked out already.
pub fn revno(config: &BzrConfig, branch: &Branch) -> BzrResult<u64> {
    if !config.is_branched(branch) {
        return Err(BzrError::NotBranched {
            name: branch.name.to_string(),
        });
    }
    let output = run_command(&["bzr", "revno"], &config.branch_path(branch))?;
    output
        .stdout
        .trim()
        .parse()
        .map_err(|_| BzrError::BadRevno {
            output: output.stdout,
        })
}

/// Fetches upstream into the checkout, discarding local state first.
///
/// Returns true when the revision number changed.
pub fn pull(config: &BzrConfig, branch: &Branch) -> BzrResult<bool> {
    let before = revno(config, branch)?;
    revert(config, branch)?;
    let path = config.branch_path(branch);
    config.retry.run_sync(
        |e: &BzrError| match e {
            BzrError::Process(p) => classify_process_error(p),
            _ => crate::retry::FailureKind::Fatal,
        },
        || {
            run_command(&["bzr", "pull", "--overwrite"], &path)?;
            Ok(())
        },
    )?;
    Ok(before != revno(config, branch)?)
}

/// Pulls the branch, or clones it if the mirror checkout does not exist yet.
///
/// Returns true when anything changed.
pub fn update(config: &BzrConfig, b: &Branch) -> BzrResult<bool> {
    if config.is_branched(b) {
        return pull(config, b);
    }
    branch(config, b)?;
    Ok(true)
}

/// Force-publishes the checkout back to its remote parent.
pub fn push(config: &BzrConfig, branch: &Branch) -> BzrResult<()> {
    let path = config.branch_path(branch);
    config.retry.run_sync(
        |e: &BzrError| match e {
            BzrError::Process(p) => classify_process_error(p),
            _ => crate::retry::FailureKind::Fatal,
        },
        || {
            run_command(&["bzr", "push", ":parent", "--overwrite"], &path)?;
            Ok(())
        },
    )?;
    Ok(())
}

/// Builds the merge commit message from the proposal's stated commit
/// message, falling back to a generic one.
pub fn merge_commit_message(source: &Branch, commit_message: Option<&str>) -> String {
    let mut message = format!("Merged lp:{}", source.name);
    match commit_message {
        Some(body) => {
            message.push_str(":\n");
            message.push_str(body);
        }
        None => message.push('.'),
    }
    message
}

/// Merges `source` into `target`, commits, and pushes the result.
///
/// On failure the target checkout is reverted best-effort so a later run
/// starts from a clean tree.
pub fn merge_source(
    config: &BzrConfig,
    target: &Branch,
    source: &Branch,
    commit_message: Option<&str>,
) -> BzrResult<()> {
    let result = merge_source_inner(config, target, source, commit_message);
    if result.is_err() {
        // Clean up a half-done merge; the original failure is what matters.
        if let Err(revert_err) = revert(config, target) {
            tracing::warn!(error = %revert_err, "could not revert target after failed merge");
        }
    }
    result
}

fn merge_source_inner(
    config: &BzrConfig,
    target: &Branch,
    source: &Branch,
    commit_message: Option<&str>,
) -> BzrResult<()> {
    let target_path = config.branch_path(target);
    run_command(
        &["bzr", "merge", &format!("../{}", source.slug)],
        &target_path,
    )?;

    let message = merge_commit_message(source, commit_message);
    run_command(&["bzr", "commit", "-m", &message], &target_path)?;
    push(config, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Branch;

    fn config(root: &Path) -> BzrConfig {
        BzrConfig::new(root, RetryPolicy::new(std::time::Duration::from_millis(1)))
    }

    #[test]
    fn branch_path_uses_slug() {
        let cfg = config(Path::new("/data/bzr_repo"));
        let b = Branch::new("~org/proj/feature");
        assert_eq!(
            cfg.branch_path(&b),
            PathBuf::from("/data/bzr_repo/_org_proj_feature")
        );
    }

    #[test]
    fn revno_requires_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let b = Branch::new("~org/proj/missing");
        assert!(matches!(
            revno(&cfg, &b),
            Err(BzrError::NotBranched { .. })
        ));
    }

    #[test]
    fn is_branched_reflects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let b = Branch::new("~org/proj/feature");
        assert!(!cfg.is_branched(&b));
        std::fs::create_dir(cfg.branch_path(&b)).unwrap();
        assert!(cfg.is_branched(&b));
    }

    #[test]
    fn commit_message_appends_proposal_message() {
        let source = Branch::new("~org/proj/feature");
        assert_eq!(
            merge_commit_message(&source, Some("Fix the thing")),
            "Merged lp:~org/proj/feature:\nFix the thing"
        );
    }

    #[test]
    fn commit_message_falls_back_to_generic() {
        let source = Branch::new("~org/proj/feature");
        assert_eq!(
            merge_commit_message(&source, None),
            "Merged lp:~org/proj/feature."
        );
    }
}
