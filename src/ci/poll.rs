//! HTTP polling of the CI providers.
//!
//! One status endpoint per provider, keyed by branch slug. A 404 means "no
//! build for this branch yet" and is not an error. Connect/timeout failures
//! are retried under the fixed-delay policy; anything else propagates to the
//! caller, which decides per provider whether to swallow or escalate.

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;

use crate::retry::{classify_http_error, FailureKind, RetryPolicy};
use crate::types::Slug;

use super::{CiState, Provider};

const TRAVIS_BRANCH_ROOT: &str = "https://api.travis-ci.org/repos/widelands/widelands/branches";
const APPVEYOR_BRANCH_ROOT: &str =
    "https://ci.appveyor.com/api/projects/widelands-dev/widelands/branch";

/// Errors from polling a CI provider.
#[derive(Debug, Error)]
pub enum PollError {
    /// The HTTP request itself failed (after transient retries).
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The provider answered with a non-OK, non-404 status.
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    /// The provider's JSON did not match the expected shape.
    #[error("unexpected payload from {url}: {source}")]
    Payload {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Polls one provider's status endpoint for a branch.
///
/// A seam so the engine can be tested without network access.
pub trait CiPoller {
    /// Returns the provider's current state for the branch, or `None` when
    /// no build exists yet.
    fn poll(
        &self,
        provider: Provider,
        slug: &Slug,
    ) -> impl Future<Output = Result<Option<CiState>, PollError>> + Send;
}

#[derive(Debug, Deserialize)]
struct TravisPayload {
    branch: TravisBranch,
}

#[derive(Debug, Deserialize)]
struct TravisBranch {
    state: String,
    number: String,
    id: i64,
}

#[derive(Debug, Deserialize)]
struct AppveyorPayload {
    build: AppveyorBuild,
}

#[derive(Debug, Deserialize)]
struct AppveyorBuild {
    status: String,
    #[serde(rename = "buildNumber")]
    build_number: i64,
    version: String,
}

/// The reqwest-backed poller.
#[derive(Debug, Clone)]
pub struct HttpCiPoller {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpCiPoller {
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        HttpCiPoller { client, retry }
    }

    fn url_for(&self, provider: Provider, slug: &Slug) -> String {
        match provider {
            Provider::Travis => format!("{}/{}", TRAVIS_BRANCH_ROOT, slug),
            Provider::Appveyor => format!("{}/{}", APPVEYOR_BRANCH_ROOT, slug),
        }
    }

    /// GETs the url, retrying connect/timeout failures forever.
    async fn fetch(&self, url: &str) -> Result<Option<reqwest::Response>, PollError> {
        let response = self
            .retry
            .run(classify_poll_error, || async {
                self.client
                    .get(url)
                    .send()
                    .await
                    .map_err(|source| PollError::Request {
                        url: url.to_string(),
                        source,
                    })
            })
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(PollError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(Some(response))
    }
}

fn classify_poll_error(err: &PollError) -> FailureKind {
    match err {
        PollError::Request { source, .. } => classify_http_error(source),
        _ => FailureKind::Fatal,
    }
}

impl CiPoller for HttpCiPoller {
    async fn poll(&self, provider: Provider, slug: &Slug) -> Result<Option<CiState>, PollError> {
        let url = self.url_for(provider, slug);
        let Some(response) = self.fetch(&url).await? else {
            tracing::debug!(provider = %provider, slug = %slug, "no build yet");
            return Ok(None);
        };

        let state = match provider {
            Provider::Travis => {
                let payload: TravisPayload =
                    response
                        .json()
                        .await
                        .map_err(|source| PollError::Payload {
                            url: url.clone(),
                            source,
                        })?;
                CiState {
                    state: payload.branch.state,
                    number: payload.branch.number,
                    id: payload.branch.id.to_string(),
                }
            }
            Provider::Appveyor => {
                let payload: AppveyorPayload =
                    response
                        .json()
                        .await
                        .map_err(|source| PollError::Payload {
                            url: url.clone(),
                            source,
                        })?;
                CiState {
                    state: payload.build.status,
                    number: payload.build.build_number.to_string(),
                    id: payload.build.version,
                }
            }
        };
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BranchName;

    #[test]
    fn urls_are_keyed_by_slug() {
        let poller = HttpCiPoller::new(reqwest::Client::new(), RetryPolicy::DEFAULT);
        let slug = BranchName::new("~org/proj/feature").slug();
        assert_eq!(
            poller.url_for(Provider::Travis, &slug),
            format!("{}/_org_proj_feature", TRAVIS_BRANCH_ROOT)
        );
        assert_eq!(
            poller.url_for(Provider::Appveyor, &slug),
            format!("{}/_org_proj_feature", APPVEYOR_BRANCH_ROOT)
        );
    }

    #[test]
    fn travis_payload_shape() {
        let json = r#"{"branch": {"state": "passed", "number": "1234", "id": 98765}}"#;
        let payload: TravisPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.branch.state, "passed");
        assert_eq!(payload.branch.number, "1234");
        assert_eq!(payload.branch.id, 98765);
    }

    #[test]
    fn appveyor_payload_shape() {
        let json =
            r#"{"build": {"status": "success", "buildNumber": 42, "version": "1.0.42"}}"#;
        let payload: AppveyorPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.build.status, "success");
        assert_eq!(payload.build.build_number, 42);
        assert_eq!(payload.build.version, "1.0.42");
    }

    #[test]
    fn only_request_errors_are_retriable() {
        let err = PollError::Status {
            url: "http://example.invalid".to_string(),
            status: 500,
        };
        assert_eq!(classify_poll_error(&err), FailureKind::Fatal);
    }
}
