//! Comment scanning: which comments are new, and which command they carry.

mod parser;
mod types;

pub use parser::{parse_comment, BOT_NAME};
pub use types::Command;

use crate::persistence::PersistedSnapshot;
use crate::types::{Comment, MergeProposal};

/// Returns the comments posted since the last recorded run.
///
/// The snapshot entry is matched on the (source, target) pair; comments are
/// never retracted, so everything from the recorded `num_comments` onwards
/// is new. A proposal seen for the first time yields its whole history.
pub fn new_comments<'a>(
    proposal: &'a MergeProposal,
    snapshot: &PersistedSnapshot,
) -> &'a [Comment] {
    match snapshot.find_proposal(&proposal.source_branch.name, &proposal.target_branch.name) {
        Some(record) => {
            let seen = record.num_comments.min(proposal.comments.len());
            &proposal.comments[seen..]
        }
        None => &proposal.comments,
    }
}

/// Finds the first actionable command among the given comments.
pub fn first_command(comments: &[Comment], bot_name: &str) -> Option<Command> {
    comments
        .iter()
        .find_map(|comment| parse_comment(&comment.message_body, bot_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ProposalRecord;
    use crate::types::Branch;

    fn proposal(comments: &[&str]) -> MergeProposal {
        MergeProposal {
            source_branch: Branch::new("~o/p/feature"),
            target_branch: Branch::new("~o/p/trunk"),
            commit_message: None,
            comments: comments.iter().map(|c| Comment::new(*c)).collect(),
            self_link: "mp-1".to_string(),
        }
    }

    fn snapshot_with(num_comments: usize) -> PersistedSnapshot {
        let mut snapshot = PersistedSnapshot::default();
        snapshot.proposals.push(ProposalRecord {
            source_branch: "~o/p/feature".into(),
            target_branch: "~o/p/trunk".into(),
            num_comments,
        });
        snapshot
    }

    #[test]
    fn unknown_proposal_yields_all_comments() {
        let p = proposal(&["a", "b"]);
        let fresh = new_comments(&p, &PersistedSnapshot::default());
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn known_proposal_yields_only_new_comments() {
        let p = proposal(&["a", "b", "c"]);
        let fresh = new_comments(&p, &snapshot_with(2));
        assert_eq!(fresh, &[Comment::new("c")]);
    }

    #[test]
    fn fully_seen_proposal_yields_nothing() {
        let p = proposal(&["a", "b"]);
        assert!(new_comments(&p, &snapshot_with(2)).is_empty());
    }

    #[test]
    fn recorded_count_beyond_live_history_is_tolerated() {
        // Should not happen (comments are never retracted), but must not panic.
        let p = proposal(&["a"]);
        assert!(new_comments(&p, &snapshot_with(5)).is_empty());
    }

    #[test]
    fn wrong_target_is_treated_as_unknown() {
        let mut p = proposal(&["a", "b"]);
        p.target_branch = Branch::new("~o/p/other");
        let fresh = new_comments(&p, &snapshot_with(1));
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn first_command_scans_in_order() {
        let comments = [
            Comment::new("nice work"),
            Comment::new("@bunnybot merge"),
            Comment::new("@bunnybot merge"),
        ];
        assert_eq!(first_command(&comments, BOT_NAME), Some(Command::Merge));
        assert_eq!(first_command(&comments[..1], BOT_NAME), None);
    }
}
