//! The reconciliation engine.
//!
//! One run compares the live set of open proposals (and their comment
//! histories) against the previously persisted snapshot and drives, per
//! proposal: source update, CI fold, mirror refresh, status reporting and
//! comment-triggered merges. A failure inside one proposal is reported back
//! to that proposal and never aborts the batch; only a failure to list the
//! proposals at all is top-level fatal.
//!
//! The engine owns no durable state. Everything it decides is derived from
//! the old snapshot and the live listing, and everything it learns ends up
//! in the new snapshot the caller persists.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::ci::{self, CiPoller, CiState, PollError, Provider};
use crate::commands::{self, Command, BOT_NAME};
use crate::launchpad::ReviewHost;
use crate::persistence::{BranchRecord, PersistedSnapshot, ProposalRecord};
use crate::types::{MergeProposal, Slug};
use crate::workspace::Workspace;

/// A failure while processing a single proposal.
///
/// Converted into a comment on that proposal; the batch continues.
#[derive(Debug, Error)]
pub enum ProposalError<WE, HE>
where
    WE: std::error::Error + 'static,
    HE: std::error::Error + 'static,
{
    #[error("{operation} failed: {source}")]
    Workspace {
        operation: &'static str,
        #[source]
        source: WE,
    },

    #[error("checking CI state failed: {0}")]
    Ci(#[source] PollError),

    #[error("posting a comment failed: {0}")]
    Host(#[source] HE),
}

/// What one engine run produced.
#[derive(Debug)]
pub struct RunReport {
    /// The fresh snapshot to persist.
    pub snapshot: PersistedSnapshot,

    /// Slugs of every branch referenced by an open proposal this run.
    /// Mirror directories outside this set are orphans.
    pub referenced_slugs: BTreeSet<Slug>,

    /// Proposals that failed and had the failure reported to them.
    pub failed_proposals: usize,
}

/// Drives one reconciliation run over the collaborator seams.
pub struct Engine<H, C, W> {
    host: H,
    ci: C,
    workspace: W,
    /// Refresh git mirrors even when the source revision did not change.
    always_update: bool,
}

impl<H, C, W> Engine<H, C, W>
where
    H: ReviewHost,
    C: CiPoller,
    W: Workspace,
{
    pub fn new(host: H, ci: C, workspace: W, always_update: bool) -> Self {
        Engine {
            host,
            ci,
            workspace,
            always_update,
        }
    }

    /// Processes every open proposal and returns the fresh snapshot.
    ///
    /// The only error that escapes is a failure to list the proposals;
    /// everything after that point is isolated per proposal.
    pub async fn run(&mut self, old: &PersistedSnapshot) -> Result<RunReport, H::Error> {
        let proposals = self.host.open_proposals().await?;
        tracing::info!(count = proposals.len(), "processing open proposals");

        let mut snapshot = PersistedSnapshot::default();
        let mut referenced_slugs = BTreeSet::new();
        let mut failed_proposals = 0;

        for proposal in &proposals {
            tracing::info!(proposal = %proposal.describe(), "===> working on proposal");
            referenced_slugs.insert(proposal.source_branch.slug.clone());
            referenced_slugs.insert(proposal.target_branch.slug.clone());

            let result = self.handle_proposal(proposal, old, &mut snapshot).await;

            // The projection is recorded even when the proposal failed: the
            // comments were seen, and the failure report below adds one more
            // that must not be rescanned next run as an actionable command.
            snapshot.proposals.push(ProposalRecord {
                source_branch: proposal.source_branch.name.clone(),
                target_branch: proposal.target_branch.name.clone(),
                num_comments: proposal.comments.len(),
            });
            carry_forward_branch_states(old, &mut snapshot, proposal);

            if let Err(err) = result {
                failed_proposals += 1;
                tracing::error!(proposal = %proposal.describe(), error = %err, "proposal failed");
                let comment = failure_comment(&err);
                if let Err(post_err) = self.host.post_comment(proposal, &comment).await {
                    tracing::error!(error = %post_err, "could not report the failure to the proposal");
                }
            }
        }

        Ok(RunReport {
            snapshot,
            referenced_slugs,
            failed_proposals,
        })
    }

    /// The per-proposal state machine: update, CI, mirror, report, command.
    async fn handle_proposal(
        &mut self,
        proposal: &MergeProposal,
        old: &PersistedSnapshot,
        snapshot: &mut PersistedSnapshot,
    ) -> Result<(), ProposalError<W::Error, H::Error>> {
        let source = &proposal.source_branch;

        let was_updated =
            self.workspace
                .update_source(source)
                .map_err(|source| ProposalError::Workspace {
                    operation: "updating the source branch",
                    source,
                })?;

        let old_record = old.branches.get(&source.name);
        let mut folded: Vec<(Provider, Option<CiState>)> = Vec::new();
        for provider in Provider::ALL {
            let old_state = old_record.and_then(|r| r.state_for(provider));
            let fresh = match self.ci.poll(provider, &source.slug).await {
                Ok(state) => state,
                // A Travis outage is not worth failing the proposal over;
                // the recorded state simply carries forward.
                Err(err) if provider == Provider::Travis => {
                    tracing::warn!(error = %err, "ignoring Travis poll failure");
                    None
                }
                Err(err) => return Err(ProposalError::Ci(err)),
            };
            folded.push((provider, fresh.map(|f| ci::fold(old_state, f))));
        }

        if self.always_update || was_updated {
            self.workspace
                .sync_mirror(source)
                .map_err(|source| ProposalError::Workspace {
                    operation: "refreshing the git mirror",
                    source,
                })?;
        }

        let mut record = BranchRecord::default();
        let mut report: Vec<(Provider, &CiState)> = Vec::new();
        let mut any_transition = false;
        for (provider, state) in &folded {
            let old_state = old_record.and_then(|r| r.state_for(*provider));
            match state {
                Some(state) => {
                    record.set_state(*provider, state.state.clone());
                    // Placeholder and in-progress states never get a line in
                    // the status comment.
                    if state.is_terminal() {
                        report.push((*provider, state));
                    }
                    if ci::transitioned(old_state, state) {
                        any_transition = true;
                    }
                }
                // No build yet (or a swallowed outage): keep what we knew.
                None => {
                    if let Some(old_state) = old_state {
                        record.set_state(*provider, old_state);
                    }
                }
            }
        }
        if record != BranchRecord::default() {
            snapshot.branches.insert(source.name.clone(), record);
        }

        if any_transition {
            let comment = ci::format_status_update(&report);
            self.host
                .post_comment(proposal, &comment)
                .await
                .map_err(ProposalError::Host)?;
        }

        let fresh_comments = commands::new_comments(proposal, old);
        match commands::first_command(fresh_comments, BOT_NAME) {
            // A plain merge only goes ahead when Travis is green; the
            // requester is told how to override the gate.
            Some(Command::Merge) => {
                let travis = folded
                    .iter()
                    .find(|(provider, _)| *provider == Provider::Travis)
                    .and_then(|(_, state)| state.as_ref());
                if travis.is_some_and(|state| state.state == "passed") {
                    self.merge(proposal)?;
                } else {
                    tracing::info!(proposal = %proposal.describe(), "refusing merge, Travis is not green");
                    self.host
                        .post_comment(proposal, &ci::format_merge_refusal(travis))
                        .await
                        .map_err(ProposalError::Host)?;
                }
            }
            Some(Command::MergeForce) => self.merge(proposal)?,
            None => {}
        }

        Ok(())
    }

    fn merge(&mut self, proposal: &MergeProposal) -> Result<(), ProposalError<W::Error, H::Error>> {
        tracing::info!(proposal = %proposal.describe(), "merge requested by comment");
        self.workspace
            .merge(proposal)
            .map_err(|source| ProposalError::Workspace {
                operation: "merging the source branch into the target",
                source,
            })
    }
}

/// Copies the previous run's CI memory for branches this run did not
/// re-record (failed proposals, target branches).
fn carry_forward_branch_states(
    old: &PersistedSnapshot,
    snapshot: &mut PersistedSnapshot,
    proposal: &MergeProposal,
) {
    for branch in [&proposal.source_branch, &proposal.target_branch] {
        if snapshot.branches.contains_key(&branch.name) {
            continue;
        }
        if let Some(record) = old.branches.get(&branch.name) {
            snapshot.branches.insert(branch.name.clone(), record.clone());
        }
    }
}

/// The comment body reporting a per-proposal failure back to the host.
fn failure_comment(err: &impl std::fmt::Display) -> String {
    format!(
        "Bunnybot encountered an error while working on this merge proposal:\n\n{}",
        err
    )
}
