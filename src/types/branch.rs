//! Newtype wrappers for branch identifiers.
//!
//! These types prevent accidental mixing of a branch's unique name (the
//! review-host identifier, e.g. `~org/project/feature`) with its slug (the
//! filesystem/git-safe form used for mirror directories and mirrored branch
//! names).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A branch's unique name on the review host.
///
/// For example: `~widelands-dev/widelands/trunk`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(pub String);

impl BranchName {
    pub fn new(s: impl Into<String>) -> Self {
        BranchName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the slug for this branch name.
    pub fn slug(&self) -> Slug {
        Slug::from_branch_name(self)
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BranchName {
    fn from(s: &str) -> Self {
        BranchName(s.to_string())
    }
}

impl From<String> for BranchName {
    fn from(s: String) -> Self {
        BranchName(s)
    }
}

/// The sanitized form of a branch name: every non-alphanumeric byte replaced
/// by `_`.
///
/// Slugs name the mirror directory under the VCS mirror root and the mirrored
/// git branch. Two distinct branch names can collide on the same slug; this is
/// an accepted limitation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    pub fn from_branch_name(name: &BranchName) -> Self {
        Slug(
            name.0
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect(),
        )
    }

    /// Wraps an already-sanitized string, e.g. a mirror directory name read
    /// back from disk.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Slug(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A branch referenced by at least one open merge proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: BranchName,
    pub slug: Slug,
}

impl Branch {
    pub fn new(name: impl Into<BranchName>) -> Self {
        let name = name.into();
        let slug = name.slug();
        Branch { name, slug }
    }
}
