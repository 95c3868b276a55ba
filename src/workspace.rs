//! The local workspace seam: source-VCS mirror plus public git mirror.
//!
//! The engine only needs four operations against local state; bundling them
//! behind one trait keeps the reconciliation logic testable without bzr or
//! git installed.

use thiserror::Error;

use crate::bzr::{self, BzrConfig, BzrError};
use crate::git::{sync, GitError, GitMirrorConfig};
use crate::types::{Branch, MergeProposal};

/// Errors from workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Bzr(#[from] BzrError),

    #[error(transparent)]
    Git(#[from] GitError),
}

/// Result type for workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Local branch state operations driven by the engine.
pub trait Workspace {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Pulls or clones the branch's source mirror. Returns true when the
    /// revision changed.
    fn update_source(&mut self, branch: &Branch) -> Result<bool, Self::Error>;

    /// Makes the public git branch match the branch's mirror content.
    fn sync_mirror(&mut self, branch: &Branch) -> Result<(), Self::Error>;

    /// Merges the proposal's source into its target, commits and publishes.
    fn merge(&mut self, proposal: &MergeProposal) -> Result<(), Self::Error>;

    /// Refreshes the trunk mirror and fast-forwards the public master.
    fn update_master(&mut self, trunk: &Branch) -> Result<(), Self::Error>;
}

impl<W: Workspace> Workspace for &mut W {
    type Error = W::Error;

    fn update_source(&mut self, branch: &Branch) -> Result<bool, W::Error> {
        (**self).update_source(branch)
    }

    fn sync_mirror(&mut self, branch: &Branch) -> Result<(), W::Error> {
        (**self).sync_mirror(branch)
    }

    fn merge(&mut self, proposal: &MergeProposal) -> Result<(), W::Error> {
        (**self).merge(proposal)
    }

    fn update_master(&mut self, trunk: &Branch) -> Result<(), W::Error> {
        (**self).update_master(trunk)
    }
}

/// The real workspace: bzr mirror root plus git mirror working copy.
pub struct LocalWorkspace {
    pub bzr: BzrConfig,
    pub git: GitMirrorConfig,
}

impl LocalWorkspace {
    pub fn new(bzr: BzrConfig, git: GitMirrorConfig) -> Self {
        LocalWorkspace { bzr, git }
    }

    /// First-run setup: initialise the shared mirror root and register the
    /// bridge remote in the git working copy.
    pub fn ensure_initialized(&self) -> WorkspaceResult<()> {
        if bzr::ensure_mirror_root(&self.bzr)? {
            sync::register_bridge_remote(&self.git, &self.bzr.mirror_root)?;
        }
        Ok(())
    }
}

impl Workspace for LocalWorkspace {
    type Error = WorkspaceError;

    fn update_source(&mut self, branch: &Branch) -> WorkspaceResult<bool> {
        Ok(bzr::update(&self.bzr, branch)?)
    }

    fn sync_mirror(&mut self, branch: &Branch) -> WorkspaceResult<()> {
        Ok(sync::sync_branch(&self.git, &branch.slug)?)
    }

    fn merge(&mut self, proposal: &MergeProposal) -> WorkspaceResult<()> {
        bzr::update(&self.bzr, &proposal.target_branch)?;
        bzr::merge_source(
            &self.bzr,
            &proposal.target_branch,
            &proposal.source_branch,
            proposal.commit_message.as_deref(),
        )?;
        Ok(())
    }

    fn update_master(&mut self, trunk: &Branch) -> WorkspaceResult<()> {
        bzr::update(&self.bzr, trunk)?;
        sync::sync_branch(&self.git, &trunk.slug)?;
        sync::update_master(&self.git, &trunk.slug)?;
        Ok(())
    }
}
