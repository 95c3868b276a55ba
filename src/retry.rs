//! Fixed-delay retry for transient network failures.
//!
//! Push and pull against the remote hosts transiently fail on name
//! resolution (of all things). The policy here retries those failures
//! forever with a fixed delay; every other failure propagates immediately.
//! An unresolvable outage therefore blocks the run rather than abandoning
//! the operation - callers must not expect bounded latency.

use std::future::Future;
use std::time::Duration;

use crate::process::ProcessError;

/// Known resolver-failure signatures in subprocess output.
///
/// Matching a set of spellings (rather than one OS-specific literal) keeps
/// classification from depending on a single platform/locale string.
const RESOLVER_SIGNATURES: &[&str] = &[
    "Name or service not known",
    "Temporary failure in name resolution",
    "Could not resolve host",
    "nodename nor servname provided",
];

/// How a failed external operation should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient network symptom - safe to retry after a delay.
    Transient,

    /// Anything else - propagate immediately, unretried.
    Fatal,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

/// Classifies a subprocess failure by its captured output.
pub fn classify_process_error(err: &ProcessError) -> FailureKind {
    match err {
        ProcessError::Failed { output, .. } => classify_output(&output.combined()),
        // A missing binary never resolves itself.
        ProcessError::Spawn { .. } => FailureKind::Fatal,
    }
}

/// Classifies captured command output.
pub fn classify_output(output: &str) -> FailureKind {
    if RESOLVER_SIGNATURES.iter().any(|sig| output.contains(sig)) {
        FailureKind::Transient
    } else {
        FailureKind::Fatal
    }
}

/// Classifies an HTTP client error using its structured kind rather than its
/// message text.
pub fn classify_http_error(err: &reqwest::Error) -> FailureKind {
    if err.is_connect() || err.is_timeout() {
        FailureKind::Transient
    } else {
        FailureKind::Fatal
    }
}

/// Retry configuration: a fixed delay between unbounded attempts.
///
/// Passed into each component at construction; there is no module-global
/// delay constant.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub delay: Duration,
}

impl RetryPolicy {
    /// The delay the bot has always used between transient retries.
    pub const DEFAULT: Self = Self {
        delay: Duration::from_secs(5),
    };

    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Runs `operation` until it succeeds or fails non-transiently.
    ///
    /// `classify` decides whether a given error is worth retrying. Transient
    /// failures are logged and retried after [`RetryPolicy::delay`], forever.
    pub async fn run<T, E, F, Fut, C>(&self, classify: C, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FailureKind,
        E: std::fmt::Display,
    {
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !classify(&err).is_transient() {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, delay_secs = self.delay.as_secs(), "transient failure, retrying");
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }

    /// Synchronous variant of [`RetryPolicy::run`] for subprocess legs.
    pub fn run_sync<T, E, F, C>(&self, classify: C, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        C: Fn(&E) -> FailureKind,
        E: std::fmt::Display,
    {
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !classify(&err).is_transient() {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, delay_secs = self.delay.as_secs(), "transient failure, retrying");
                    std::thread::sleep(self.delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}
