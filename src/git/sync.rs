//! Mirroring a source-VCS branch into the public git host.
//!
//! The steps are idempotent and safe to repeat: refresh the bridge tracking
//! configuration, fetch, create the local tracking branch only when absent,
//! check it out, pull, and force-push. The force-push direction is always
//! mirror -> public host, never the reverse, so local-only commits are never
//! lost to a remote state.

use std::path::Path;

use crate::process::run_command;
use crate::retry::classify_process_error;
use crate::types::Slug;

use super::{branches, checkout, GitError, GitMirrorConfig, GitResult, BRIDGE_REMOTE, PUBLIC_REMOTE};

/// Registers the bzr bridge remote in the mirror working copy.
///
/// Called once, right after the shared mirror root has been initialised.
pub fn register_bridge_remote(config: &GitMirrorConfig, mirror_root: &Path) -> GitResult<()> {
    let url = format!(
        "bzr::file://{}",
        std::path::absolute(mirror_root)
            .unwrap_or_else(|_| mirror_root.to_path_buf())
            .display()
    );
    run_command(
        &["git", "remote", "add", BRIDGE_REMOTE, &url],
        &config.workdir,
    )?;
    Ok(())
}

/// Makes the public git branch named by `slug` match the source branch's
/// current mirror content.
pub fn sync_branch(config: &GitMirrorConfig, slug: &Slug) -> GitResult<()> {
    run_command(
        &["git", "config", "remote-bzr.branches", slug.as_str()],
        &config.workdir,
    )?;
    run_command(&["git", "fetch", BRIDGE_REMOTE], &config.workdir)?;

    if !branches(config)?.contains(slug.as_str()) {
        run_command(
            &[
                "git",
                "branch",
                "--track",
                slug.as_str(),
                &format!("{}/{}", BRIDGE_REMOTE, slug),
            ],
            &config.workdir,
        )?;
    }
    checkout(config, slug.as_str())?;

    pull_retried(config)?;
    force_push_retried(config, slug.as_str())?;
    Ok(())
}

/// Fast-forwards the public `master` branch to the already-synced trunk
/// mirror branch and force-pushes it.
pub fn update_master(config: &GitMirrorConfig, trunk_slug: &Slug) -> GitResult<()> {
    checkout(config, "master")?;
    run_command(
        &["git", "merge", "--ff-only", trunk_slug.as_str()],
        &config.workdir,
    )?;
    force_push_retried(config, "master")?;
    Ok(())
}

fn pull_retried(config: &GitMirrorConfig) -> GitResult<()> {
    config.retry.run_sync(classify_git_error, || {
        run_command(&["git", "pull"], &config.workdir)?;
        Ok(())
    })
}

fn force_push_retried(config: &GitMirrorConfig, branch_name: &str) -> GitResult<()> {
    config.retry.run_sync(classify_git_error, || {
        run_command(
            &["git", "push", PUBLIC_REMOTE, branch_name, "--force"],
            &config.workdir,
        )?;
        Ok(())
    })
}

fn classify_git_error(err: &GitError) -> crate::retry::FailureKind {
    match err {
        GitError::Process(p) => classify_process_error(p),
        GitError::ProtectedBranch { .. } => crate::retry::FailureKind::Fatal,
    }
}
