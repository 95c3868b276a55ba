//! The in-memory model of a merge proposal.
//!
//! Proposals are reconstructed fresh every run from the live review-host
//! listing. Nothing here is persisted directly; the snapshot stores only the
//! projection `(source_branch, target_branch, num_comments)` (see
//! `persistence`).

use crate::types::Branch;

/// One review comment on a merge proposal, in posting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub message_body: String,
}

impl Comment {
    pub fn new(body: impl Into<String>) -> Self {
        Comment {
            message_body: body.into(),
        }
    }
}

/// An open merge proposal: source branch, target branch and the ordered
/// comment history.
#[derive(Debug, Clone)]
pub struct MergeProposal {
    pub source_branch: Branch,
    pub target_branch: Branch,
    /// The submitter's proposed commit message, if any. Used to build the
    /// merge commit message.
    pub commit_message: Option<String>,
    pub comments: Vec<Comment>,
    /// Opaque handle used when posting comments back to this proposal.
    pub self_link: String,
}

impl MergeProposal {
    /// Human-readable `source -> target` label for log lines.
    pub fn describe(&self) -> String {
        format!("{} -> {}", self.source_branch.name, self.target_branch.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_names_both_branches() {
        let p = MergeProposal {
            source_branch: Branch::new("~org/proj/feature"),
            target_branch: Branch::new("~org/proj/trunk"),
            commit_message: None,
            comments: vec![],
            self_link: "mp-1".to_string(),
        };
        assert_eq!(p.describe(), "~org/proj/feature -> ~org/proj/trunk");
    }
}
