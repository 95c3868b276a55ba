//! Command types for `@bunnybot` review-comment commands.

use serde::{Deserialize, Serialize};

/// A parsed `@bunnybot` command from a review comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Merge the proposal's source branch into its target: `@bunnybot merge`.
    /// Only carried out when CI is green.
    Merge,

    /// Merge regardless of CI state: `@bunnybot merge force`
    MergeForce,
}

/// The keyword table mapping command phrases to commands.
///
/// New commands are added here (and to the enum), not by growing the
/// scanning logic. Longer phrases come first so `merge force` is not
/// swallowed by `merge`.
pub const KEYWORDS: &[(&[&str], Command)] = &[
    (&["merge", "force"], Command::MergeForce),
    (&["merge"], Command::Merge),
];

/// Matches the start of a token sequence against the keyword table.
///
/// Matching is case-sensitive; surrounding punctuation has already been
/// stripped from each token by the scanner.
pub fn lookup_keyword(tokens: &[&str]) -> Option<Command> {
    KEYWORDS
        .iter()
        .find(|(phrase, _)| tokens.starts_with(phrase))
        .map(|(_, command)| *command)
}
