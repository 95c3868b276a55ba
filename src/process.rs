//! Subprocess execution with captured output.
//!
//! All external VCS and git operations go through [`run_command`], which
//! captures combined stdout/stderr so failures can be classified (see
//! `retry`) and reported back to the review host verbatim.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// stdout and stderr concatenated, for error classification and for
    /// comments posted back to the review host.
    pub fn combined(&self) -> String {
        let mut s = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }
        s
    }
}

/// Errors from running a subprocess.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command ran and exited non-zero. Carries the command line and its
    /// captured output.
    #[error("command failed: {command}\noutput:\n{}", output.combined())]
    Failed {
        command: String,
        output: ProcessOutput,
    },

    /// The command could not be spawned at all (binary missing, permissions).
    #[error("could not spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for subprocess operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Runs a command in the given working directory, capturing its output.
///
/// The command line and working directory are logged at debug level; output
/// lines at trace level. A non-zero exit status becomes
/// [`ProcessError::Failed`] with the full captured output.
pub fn run_command(args: &[&str], cwd: &Path) -> ProcessResult<ProcessOutput> {
    let command_line = args.join(" ");
    tracing::debug!(command = %command_line, cwd = %cwd.display(), "running command");

    let result = Command::new(args[0])
        .args(&args[1..])
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output();

    let raw = result.map_err(|source| ProcessError::Spawn {
        command: command_line.clone(),
        source,
    })?;

    let output = ProcessOutput {
        stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
    };

    for line in output.stdout.lines().chain(output.stderr.lines()) {
        tracing::trace!("  {}", line.trim_end());
    }

    if !raw.status.success() {
        return Err(ProcessError::Failed {
            command: command_line,
            output,
        });
    }
    Ok(output)
}
