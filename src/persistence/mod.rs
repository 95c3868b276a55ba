//! The persisted snapshot: the bot's only cross-run memory.
//!
//! # File format
//!
//! JSON, written atomically (temp file + fsync + rename + directory fsync)
//! so readers always see either the old or the new snapshot. The schema is
//! versioned explicitly; the current version is 1:
//!
//! ```text
//! {
//!   "schema_version": 1,
//!   "branches": { "<unique_name>": { "travis_state": {"state": "passed"},
//!                                    "appveyor_state": {"state": "success"} } },
//!   "proposals": [ { "source_branch": "...", "target_branch": "...", "num_comments": 3 } ]
//! }
//! ```
//!
//! Version-0 files (no `schema_version`; proposals under a `merge_proposals`
//! or the even older `merge_requests` key; CI entries carrying extra build
//! metadata) are upgraded transparently on load.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ci::Provider;
use crate::types::{BranchName, Slug};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from snapshot load/save.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file's schema version is newer than this binary understands.
    #[error("snapshot schema version {got} is newer than supported version {supported}")]
    UnsupportedVersion { got: u32, supported: u32 },
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// A provider's recorded terminal status for a branch.
///
/// Only the status string is durable; build numbers and ids are refetched
/// every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedStatus {
    pub state: String,
}

/// Per-branch CI memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travis_state: Option<RecordedStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appveyor_state: Option<RecordedStatus>,
}

impl BranchRecord {
    pub fn state_for(&self, provider: Provider) -> Option<&str> {
        let record = match provider {
            Provider::Travis => self.travis_state.as_ref(),
            Provider::Appveyor => self.appveyor_state.as_ref(),
        };
        record.map(|r| r.state.as_str())
    }

    pub fn set_state(&mut self, provider: Provider, state: impl Into<String>) {
        let slot = match provider {
            Provider::Travis => &mut self.travis_state,
            Provider::Appveyor => &mut self.appveyor_state,
        };
        *slot = Some(RecordedStatus {
            state: state.into(),
        });
    }
}

/// The persisted projection of one merge proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub source_branch: BranchName,
    pub target_branch: BranchName,
    pub num_comments: usize,
}

/// The durable cross-run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub schema_version: u32,
    pub branches: BTreeMap<BranchName, BranchRecord>,
    pub proposals: Vec<ProposalRecord>,
}

impl Default for PersistedSnapshot {
    fn default() -> Self {
        PersistedSnapshot {
            schema_version: SCHEMA_VERSION,
            branches: BTreeMap::new(),
            proposals: Vec::new(),
        }
    }
}

impl PersistedSnapshot {
    /// Looks up the recorded projection for a (source, target) pair.
    pub fn find_proposal(
        &self,
        source: &BranchName,
        target: &BranchName,
    ) -> Option<&ProposalRecord> {
        self.proposals
            .iter()
            .find(|p| &p.source_branch == source && &p.target_branch == target)
    }

    /// Drops every entry that mentions a branch with the given slug.
    ///
    /// Called after orphan cleanup deletes the slug's mirror.
    pub fn remove_slug_mentions(&mut self, slug: &Slug) {
        self.proposals
            .retain(|p| &p.source_branch.slug() != slug && &p.target_branch.slug() != slug);
        self.branches.retain(|name, _| &name.slug() != slug);
    }
}

// ─── Legacy (version 0) format ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LegacyCiStatus {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyBranchRecord {
    #[serde(default)]
    travis_state: Option<LegacyCiStatus>,
    #[serde(default)]
    appveyor_state: Option<LegacyCiStatus>,
}

#[derive(Debug, Deserialize)]
struct LegacySnapshot {
    #[serde(default)]
    branches: BTreeMap<BranchName, LegacyBranchRecord>,
    // The proposal list key was renamed over the years.
    #[serde(default, alias = "merge_requests")]
    merge_proposals: Vec<ProposalRecord>,
}

impl From<LegacySnapshot> for PersistedSnapshot {
    fn from(legacy: LegacySnapshot) -> Self {
        let branches = legacy
            .branches
            .into_iter()
            .map(|(name, record)| {
                let upgraded = BranchRecord {
                    travis_state: record
                        .travis_state
                        .filter(|s| !s.state.is_empty())
                        .map(|s| RecordedStatus { state: s.state }),
                    appveyor_state: record
                        .appveyor_state
                        .filter(|s| !s.state.is_empty())
                        .map(|s| RecordedStatus { state: s.state }),
                };
                (name, upgraded)
            })
            .collect();
        PersistedSnapshot {
            schema_version: SCHEMA_VERSION,
            branches,
            proposals: legacy.merge_proposals,
        }
    }
}

// ─── Load / save ────────────────────────────────────────────────────────────

/// Loads the snapshot, upgrading legacy files.
///
/// A missing file yields the empty default (first run).
pub fn load_snapshot(path: &Path) -> Result<PersistedSnapshot> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no snapshot yet, starting fresh");
            return Ok(PersistedSnapshot::default());
        }
        Err(err) => return Err(err.into()),
    };

    let value: serde_json::Value = serde_json::from_str(&raw)?;
    match value.get("schema_version").and_then(|v| v.as_u64()) {
        Some(version) if version as u32 > SCHEMA_VERSION => Err(SnapshotError::UnsupportedVersion {
            got: version as u32,
            supported: SCHEMA_VERSION,
        }),
        Some(_) => Ok(serde_json::from_value(value)?),
        None => {
            tracing::info!(path = %path.display(), "upgrading legacy snapshot");
            let legacy: LegacySnapshot = serde_json::from_value(value)?;
            Ok(legacy.into())
        }
    }
}

/// Saves the snapshot atomically.
///
/// Write-to-temp-then-rename with fsyncs, so a crash mid-write leaves the
/// previous snapshot intact.
pub fn save_snapshot_atomic(path: &Path, snapshot: &PersistedSnapshot) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(snapshot)?;

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        // Directory fsync makes the rename itself durable. Not all
        // filesystems support opening a directory; ignore failures.
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> BranchName {
        BranchName::new(s)
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = load_snapshot(&dir.path().join("state.json")).unwrap();
        assert_eq!(snapshot, PersistedSnapshot::default());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut snapshot = PersistedSnapshot::default();
        snapshot
            .branches
            .entry(name("~o/p/feature"))
            .or_default()
            .set_state(Provider::Travis, "passed");
        snapshot.proposals.push(ProposalRecord {
            source_branch: name("~o/p/feature"),
            target_branch: name("~o/p/trunk"),
            num_comments: 3,
        });

        save_snapshot_atomic(&path, &snapshot).unwrap();
        assert_eq!(load_snapshot(&path).unwrap(), snapshot);
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        save_snapshot_atomic(&path, &PersistedSnapshot::default()).unwrap();
        let mut second = PersistedSnapshot::default();
        second.proposals.push(ProposalRecord {
            source_branch: name("~o/p/a"),
            target_branch: name("~o/p/trunk"),
            num_comments: 1,
        });
        save_snapshot_atomic(&path, &second).unwrap();

        assert_eq!(load_snapshot(&path).unwrap(), second);
        // No temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn legacy_v0_file_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{
                "branches": {
                    "~o/p/feature": {
                        "travis_state": {"state": "passed", "number": "12", "id": "9"},
                        "appveyor_state": {"state": ""}
                    }
                },
                "merge_proposals": [
                    {"source_branch": "~o/p/feature", "target_branch": "~o/p/trunk", "num_comments": 2}
                ]
            }"#,
        )
        .unwrap();

        let snapshot = load_snapshot(&path).unwrap();
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        let record = &snapshot.branches[&name("~o/p/feature")];
        assert_eq!(record.state_for(Provider::Travis), Some("passed"));
        // An empty legacy state means "never seen", not a real status.
        assert_eq!(record.state_for(Provider::Appveyor), None);
        assert_eq!(snapshot.proposals.len(), 1);
        assert_eq!(snapshot.proposals[0].num_comments, 2);
    }

    #[test]
    fn oldest_merge_requests_key_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{
                "branches": {},
                "merge_requests": [
                    {"source_branch": "~o/p/a", "target_branch": "~o/p/trunk", "num_comments": 1}
                ]
            }"#,
        )
        .unwrap();

        let snapshot = load_snapshot(&path).unwrap();
        assert_eq!(snapshot.proposals.len(), 1);
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 999, "branches": {}, "proposals": []}"#,
        )
        .unwrap();
        assert!(matches!(
            load_snapshot(&path),
            Err(SnapshotError::UnsupportedVersion { got: 999, .. })
        ));
    }

    #[test]
    fn find_proposal_matches_both_branches() {
        let mut snapshot = PersistedSnapshot::default();
        snapshot.proposals.push(ProposalRecord {
            source_branch: name("~o/p/a"),
            target_branch: name("~o/p/trunk"),
            num_comments: 4,
        });

        assert!(snapshot
            .find_proposal(&name("~o/p/a"), &name("~o/p/trunk"))
            .is_some());
        assert!(snapshot
            .find_proposal(&name("~o/p/a"), &name("~o/p/other"))
            .is_none());
        assert!(snapshot
            .find_proposal(&name("~o/p/b"), &name("~o/p/trunk"))
            .is_none());
    }

    #[test]
    fn remove_slug_mentions_drops_branches_and_proposals() {
        let mut snapshot = PersistedSnapshot::default();
        snapshot
            .branches
            .entry(name("~o/p/gone"))
            .or_default()
            .set_state(Provider::Travis, "passed");
        snapshot
            .branches
            .entry(name("~o/p/kept"))
            .or_default()
            .set_state(Provider::Travis, "failed");
        snapshot.proposals.push(ProposalRecord {
            source_branch: name("~o/p/gone"),
            target_branch: name("~o/p/trunk"),
            num_comments: 1,
        });
        snapshot.proposals.push(ProposalRecord {
            source_branch: name("~o/p/kept"),
            target_branch: name("~o/p/trunk"),
            num_comments: 1,
        });

        snapshot.remove_slug_mentions(&name("~o/p/gone").slug());

        assert!(!snapshot.branches.contains_key(&name("~o/p/gone")));
        assert!(snapshot.branches.contains_key(&name("~o/p/kept")));
        assert_eq!(snapshot.proposals.len(), 1);
        assert_eq!(snapshot.proposals[0].source_branch, name("~o/p/kept"));
    }
}
