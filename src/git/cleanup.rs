//! Removal of mirrored branches no longer referenced by any open proposal.
//!
//! After all proposals are processed, the set of slugs seen this run is
//! diffed against the subdirectories of the mirror root. For every orphan,
//! three deletion steps run independently: the public remote branch, the
//! local mirror branch, and the mirror directory. Each step tolerates
//! failure (most often the remote branch was never really there) so later
//! steps still run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::types::Slug;

use super::{delete_local_branch, delete_remote_branch, GitMirrorConfig, GitResult};

/// Deletion steps for one orphaned mirror branch.
///
/// A seam over the real git/filesystem operations so the per-step fault
/// tolerance is testable without a git checkout.
pub trait MirrorCleaner {
    fn delete_remote_branch(&mut self, slug: &Slug) -> GitResult<()>;
    fn delete_local_branch(&mut self, slug: &Slug) -> GitResult<()>;
    fn remove_mirror_dir(&mut self, slug: &Slug) -> std::io::Result<()>;
}

/// The real cleaner: git commands in the mirror working copy plus directory
/// removal under the mirror root.
pub struct LocalMirrorCleaner {
    pub git: GitMirrorConfig,
    pub mirror_root: PathBuf,
}

impl MirrorCleaner for LocalMirrorCleaner {
    fn delete_remote_branch(&mut self, slug: &Slug) -> GitResult<()> {
        delete_remote_branch(&self.git, slug.as_str())
    }

    fn delete_local_branch(&mut self, slug: &Slug) -> GitResult<()> {
        delete_local_branch(&self.git, slug.as_str())
    }

    fn remove_mirror_dir(&mut self, slug: &Slug) -> std::io::Result<()> {
        std::fs::remove_dir_all(self.mirror_root.join(slug.as_str()))
    }
}

/// Lists the slugs currently checked out under the mirror root.
///
/// The shared repository's own `.bzr` control directory is not a branch.
pub fn on_disk_slugs(mirror_root: &Path) -> std::io::Result<BTreeSet<Slug>> {
    let mut slugs = BTreeSet::new();
    for entry in std::fs::read_dir(mirror_root)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ".bzr" {
            continue;
        }
        slugs.insert(Slug::from_raw(name));
    }
    Ok(slugs)
}

/// The on-disk slugs not referenced by any branch seen this run.
pub fn orphan_slugs(referenced: &BTreeSet<Slug>, on_disk: &BTreeSet<Slug>) -> Vec<Slug> {
    on_disk.difference(referenced).cloned().collect()
}

/// Deletes every orphaned mirror branch, best-effort per step.
///
/// Returns the slugs that were processed (the caller drops their snapshot
/// entries).
pub fn cleanup_orphans<C: MirrorCleaner>(
    cleaner: &mut C,
    referenced: &BTreeSet<Slug>,
    on_disk: &BTreeSet<Slug>,
) -> Vec<Slug> {
    let orphans = orphan_slugs(referenced, on_disk);
    for slug in &orphans {
        tracing::info!(slug = %slug, "deleting mirror branch no longer referenced by any proposal");

        if let Err(err) = cleaner.delete_remote_branch(slug) {
            tracing::warn!(slug = %slug, error = %err, "ignored error deleting remote branch");
        }
        if let Err(err) = cleaner.delete_local_branch(slug) {
            tracing::warn!(slug = %slug, error = %err, "ignored error deleting local branch");
        }
        if let Err(err) = cleaner.remove_mirror_dir(slug) {
            tracing::warn!(slug = %slug, error = %err, "ignored error removing mirror directory");
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessError, ProcessOutput};
    use crate::types::BranchName;

    fn slug(name: &str) -> Slug {
        BranchName::new(name).slug()
    }

    fn failure(step: &str) -> super::super::GitError {
        ProcessError::Failed {
            command: step.to_string(),
            output: ProcessOutput {
                stdout: String::new(),
                stderr: "error: unable to delete".to_string(),
            },
        }
        .into()
    }

    #[derive(Default)]
    struct RecordingCleaner {
        remote_deleted: Vec<Slug>,
        local_deleted: Vec<Slug>,
        dirs_removed: Vec<Slug>,
        fail_remote: bool,
        fail_local: bool,
    }

    impl MirrorCleaner for RecordingCleaner {
        fn delete_remote_branch(&mut self, slug: &Slug) -> GitResult<()> {
            if self.fail_remote {
                return Err(failure("git push github :branch"));
            }
            self.remote_deleted.push(slug.clone());
            Ok(())
        }

        fn delete_local_branch(&mut self, slug: &Slug) -> GitResult<()> {
            if self.fail_local {
                return Err(failure("git branch -D"));
            }
            self.local_deleted.push(slug.clone());
            Ok(())
        }

        fn remove_mirror_dir(&mut self, slug: &Slug) -> std::io::Result<()> {
            self.dirs_removed.push(slug.clone());
            Ok(())
        }
    }

    #[test]
    fn only_unreferenced_slugs_are_orphans() {
        let referenced: BTreeSet<_> = [slug("~o/p/a"), slug("~o/p/b")].into();
        let on_disk: BTreeSet<_> = [slug("~o/p/a"), slug("~o/p/b"), slug("~o/p/c")].into();

        let orphans = orphan_slugs(&referenced, &on_disk);
        assert_eq!(orphans, vec![slug("~o/p/c")]);
    }

    #[test]
    fn nothing_to_delete_when_sets_match() {
        let referenced: BTreeSet<_> = [slug("~o/p/a")].into();
        let orphans = orphan_slugs(&referenced, &referenced.clone());
        assert!(orphans.is_empty());
    }

    #[test]
    fn all_three_steps_run_per_orphan() {
        let mut cleaner = RecordingCleaner::default();
        let referenced: BTreeSet<_> = [slug("~o/p/a")].into();
        let on_disk: BTreeSet<_> = [slug("~o/p/a"), slug("~o/p/c")].into();

        let deleted = cleanup_orphans(&mut cleaner, &referenced, &on_disk);

        assert_eq!(deleted, vec![slug("~o/p/c")]);
        assert_eq!(cleaner.remote_deleted, vec![slug("~o/p/c")]);
        assert_eq!(cleaner.local_deleted, vec![slug("~o/p/c")]);
        assert_eq!(cleaner.dirs_removed, vec![slug("~o/p/c")]);
    }

    #[test]
    fn remote_failure_does_not_block_later_steps() {
        let mut cleaner = RecordingCleaner {
            fail_remote: true,
            ..Default::default()
        };
        let referenced = BTreeSet::new();
        let on_disk: BTreeSet<_> = [slug("~o/p/c")].into();

        cleanup_orphans(&mut cleaner, &referenced, &on_disk);

        assert!(cleaner.remote_deleted.is_empty());
        assert_eq!(cleaner.local_deleted, vec![slug("~o/p/c")]);
        assert_eq!(cleaner.dirs_removed, vec![slug("~o/p/c")]);
    }

    #[test]
    fn local_failure_does_not_block_directory_removal() {
        let mut cleaner = RecordingCleaner {
            fail_local: true,
            ..Default::default()
        };
        let referenced = BTreeSet::new();
        let on_disk: BTreeSet<_> = [slug("~o/p/c")].into();

        cleanup_orphans(&mut cleaner, &referenced, &on_disk);

        assert_eq!(cleaner.remote_deleted, vec![slug("~o/p/c")]);
        assert!(cleaner.local_deleted.is_empty());
        assert_eq!(cleaner.dirs_removed, vec![slug("~o/p/c")]);
    }

    #[test]
    fn on_disk_scan_skips_control_dir_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".bzr")).unwrap();
        std::fs::create_dir(dir.path().join("_org_proj_a")).unwrap();
        std::fs::write(dir.path().join("stray-file"), b"x").unwrap();

        let slugs = on_disk_slugs(dir.path()).unwrap();
        assert_eq!(slugs, [Slug::from_raw("_org_proj_a")].into());
    }
}
