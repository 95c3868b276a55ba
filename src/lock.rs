//! Advisory pidfile lock.
//!
//! The bot runs unattended from a scheduler, so overlapping invocations are
//! possible and must be prevented: two runs sharing the mirror working
//! copies would corrupt them. The lock is a pidfile created with
//! create-new semantics; a file left behind by a crashed run (its pid no
//! longer alive) is reclaimed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors acquiring the pidfile lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not access pidfile {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a lock attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// The lock is ours; dropping the guard releases it.
    Acquired(PidfileLock),
    /// Another live run holds the lock. Exit quietly and let it finish.
    Held { pid: u32 },
}

/// The held lock. Removes the pidfile on drop.
#[derive(Debug)]
pub struct PidfileLock {
    path: PathBuf,
}

impl Drop for PidfileLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "could not remove pidfile");
        }
    }
}

/// Whether a process with the given pid is currently alive.
///
/// Only used to decide whether a leftover pidfile is stale; a false
/// positive just means we defer to a pid that happens to be reused.
fn pid_is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Tries to take the pidfile lock at `path`.
///
/// A stale pidfile (unparseable, or naming a dead pid) is removed and the
/// acquisition retried once.
pub fn acquire(path: &Path) -> Result<LockAttempt, LockError> {
    let io_err = |source| LockError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    for _ in 0..2 {
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                use std::io::Write;
                write!(file, "{}", std::process::id()).map_err(io_err)?;
                return Ok(LockAttempt::Acquired(PidfileLock {
                    path: path.to_path_buf(),
                }));
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let contents = fs::read_to_string(path).map_err(io_err)?;
                match contents.trim().parse::<u32>() {
                    Ok(pid) if pid_is_alive(pid) => return Ok(LockAttempt::Held { pid }),
                    Ok(pid) => {
                        tracing::warn!(pid, "reclaiming pidfile of dead process");
                    }
                    Err(_) => {
                        tracing::warn!(contents = %contents.trim(), "reclaiming garbled pidfile");
                    }
                }
                fs::remove_file(path).map_err(io_err)?;
            }
            Err(err) => return Err(io_err(err)),
        }
    }

    // Two reclamation attempts lost the race both times; someone live has it.
    let contents = fs::read_to_string(path).map_err(io_err)?;
    let pid = contents.trim().parse::<u32>().unwrap_or(0);
    Ok(LockAttempt::Held { pid })
}
