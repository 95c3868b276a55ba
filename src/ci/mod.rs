//! CI state tracking and folding.
//!
//! Each branch is polled once per provider per run. The fold rule is the
//! heart of this module: a provider response only replaces the previously
//! recorded state when its status is terminal, so an in-progress build never
//! overwrites a recorded "passed". The pure logic lives here; the HTTP
//! pollers live in `poll`.

pub mod poll;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use poll::{CiPoller, HttpCiPoller, PollError};

/// The closed set of terminal build statuses.
///
/// Travis reports `passed`, Appveyor reports `success`; both vocabularies
/// are accepted.
pub const TERMINAL_STATES: &[&str] = &["passed", "success", "failed", "errored", "canceled"];

/// Placeholder status recorded before any terminal state has been seen.
pub const UNKNOWN_STATE: &str = "unknown";

/// Whether a provider-reported status is terminal.
pub fn is_terminal(state: &str) -> bool {
    TERMINAL_STATES.contains(&state)
}

/// The CI providers the bot polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Travis,
    Appveyor,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Travis, Provider::Appveyor];

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Travis => "Travis",
            Provider::Appveyor => "Appveyor",
        }
    }

    /// Human-facing build details URL for a state reported by this provider.
    pub fn details_url(&self, state: &CiState) -> String {
        match self {
            Provider::Travis => format!(
                "https://travis-ci.org/widelands/widelands/builds/{}",
                state.id
            ),
            Provider::Appveyor => format!(
                "https://ci.appveyor.com/project/widelands-dev/widelands/build/{}",
                state.id
            ),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One provider's reported state for a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiState {
    pub state: String,
    pub number: String,
    pub id: String,
}

impl CiState {
    pub fn is_terminal(&self) -> bool {
        is_terminal(&self.state)
    }
}

/// Folds a fresh provider response into the previously recorded status.
///
/// A terminal fresh state wins; a non-terminal one keeps the old status
/// (falling back to "unknown") while still carrying the fresh build
/// number/id for display.
pub fn fold(old_state: Option<&str>, fresh: CiState) -> CiState {
    if fresh.is_terminal() {
        return fresh;
    }
    CiState {
        state: old_state.unwrap_or(UNKNOWN_STATE).to_string(),
        ..fresh
    }
}

/// Whether a folded state is a reportable transition away from the
/// previously recorded one.
pub fn transitioned(old_state: Option<&str>, folded: &CiState) -> bool {
    folded.is_terminal() && old_state != Some(folded.state.as_str())
}

/// Builds the status-change comment body posted to the review host.
pub fn format_status_update(states: &[(Provider, &CiState)]) -> String {
    let mut comment = String::from("Continuous integration builds have changed state:\n");
    for (provider, state) in states {
        comment.push('\n');
        comment.push_str(&format!(
            "{} build {}. State: {}. Details: {}.",
            provider.name(),
            state.number,
            state.state,
            provider.details_url(state)
        ));
    }
    comment
}

/// Builds the comment refusing a plain merge command while Travis is not
/// green, naming the force command that overrides the gate.
pub fn format_merge_refusal(travis: Option<&CiState>) -> String {
    let mut comment = String::from(
        "Refusing to merge, since Travis is not green. \
         Use @bunnybot merge force for merging anyways.\n",
    );
    if let Some(state) = travis {
        comment.push('\n');
        comment.push_str(&format!(
            "Travis build {}. State: {}. Details: {}.",
            state.number,
            state.state,
            Provider::Travis.details_url(state)
        ));
    }
    comment
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(s: &str) -> CiState {
        CiState {
            state: s.to_string(),
            number: "17".to_string(),
            id: "12345".to_string(),
        }
    }

    #[test]
    fn terminal_set_membership() {
        for s in TERMINAL_STATES {
            assert!(is_terminal(s));
        }
        assert!(!is_terminal("started"));
        assert!(!is_terminal("queued"));
        assert!(!is_terminal(UNKNOWN_STATE));
    }

    #[test]
    fn terminal_fresh_state_replaces_old() {
        let folded = fold(Some("passed"), state("failed"));
        assert_eq!(folded.state, "failed");
    }

    #[test]
    fn transitional_fresh_state_keeps_old_terminal() {
        let folded = fold(Some("passed"), state("started"));
        assert_eq!(folded.state, "passed");
        // Fresh build metadata is still carried for display.
        assert_eq!(folded.number, "17");
    }

    #[test]
    fn transitional_without_history_is_unknown() {
        let folded = fold(None, state("started"));
        assert_eq!(folded.state, UNKNOWN_STATE);
    }

    #[test]
    fn transition_requires_terminal_difference() {
        assert!(transitioned(Some("passed"), &state("failed")));
        assert!(transitioned(None, &state("passed")));
        assert!(!transitioned(Some("passed"), &state("passed")));
        // A folded non-terminal state is never reportable.
        assert!(!transitioned(Some("passed"), &fold(Some("passed"), state("started"))));
        assert!(!transitioned(None, &fold(None, state("started"))));
    }

    proptest! {
        /// Once terminal, a stored status survives any non-terminal poll.
        #[test]
        fn terminal_status_is_monotonic(fresh in "[a-z]{1,10}") {
            prop_assume!(!is_terminal(&fresh));
            let folded = fold(Some("passed"), state(&fresh));
            prop_assert_eq!(folded.state, "passed");
        }

        /// Folding never produces a state the provider did not report unless
        /// it is the preserved old one or "unknown".
        #[test]
        fn fold_output_is_old_fresh_or_unknown(
            old in proptest::option::of("[a-z]{1,10}"),
            fresh in "[a-z]{1,10}",
        ) {
            let folded = fold(old.as_deref(), state(&fresh));
            let allowed = folded.state == fresh
                || Some(folded.state.as_str()) == old.as_deref()
                || folded.state == UNKNOWN_STATE;
            prop_assert!(allowed);
        }
    }

    #[test]
    fn status_update_lists_each_provider() {
        let travis = state("passed");
        let appveyor = CiState {
            state: "success".to_string(),
            number: "42".to_string(),
            id: "1.0.42".to_string(),
        };
        let comment = format_status_update(&[
            (Provider::Travis, &travis),
            (Provider::Appveyor, &appveyor),
        ]);
        assert!(comment.starts_with("Continuous integration builds have changed state:\n"));
        assert!(comment.contains("Travis build 17. State: passed."));
        assert!(comment.contains("Appveyor build 42. State: success."));
        assert!(comment.contains("/build/1.0.42"));
    }

    #[test]
    fn merge_refusal_names_the_force_command() {
        let comment = format_merge_refusal(Some(&state("errored")));
        assert!(comment.starts_with("Refusing to merge, since Travis is not green."));
        assert!(comment.contains("@bunnybot merge force"));
        assert!(comment.contains("Travis build 17. State: errored."));
    }

    #[test]
    fn merge_refusal_without_build_has_no_detail_line() {
        let comment = format_merge_refusal(None);
        assert!(comment.contains("@bunnybot merge force"));
        assert!(!comment.contains("Travis build"));
    }

    #[test]
    fn details_urls_embed_build_id() {
        let s = state("passed");
        assert!(Provider::Travis.details_url(&s).contains("/builds/12345"));
        assert!(Provider::Appveyor.details_url(&s).contains("/build/12345"));
    }
}
