//! Review host client (Launchpad REST API).
//!
//! Lists the open merge proposals for the watched trunk branch, fetches
//! their comment histories, and posts comments back. Posting authenticates
//! with OAuth 1.0 PLAINTEXT, which is all the host supports.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use crate::retry::{classify_http_error, FailureKind, RetryPolicy};
use crate::types::{Branch, BranchName, Comment, MergeProposal};

const API_BASE: &str = "https://api.launchpad.net";
const LP_API: &str = "https://api.launchpad.net/1.0/";

/// Errors from review-host operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// The HTTP request failed (after transient retries).
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The host answered with a non-success status.
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    /// The host's JSON did not match the expected shape.
    #[error("unexpected payload from {url}: {source}")]
    Payload {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A proposal referenced a branch outside the host's API namespace.
    #[error("branch link {link} does not start with {LP_API}")]
    ForeignBranchLink { link: String },
}

/// Result type for review-host operations.
pub type HostResult<T> = Result<T, HostError>;

/// OAuth 1.0 credentials for the review host.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    consumer_key: String,
    access_token: String,
    access_secret: String,
}

/// Errors loading the credentials file.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("could not read credentials file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse credentials file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CredentialsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// The review host seam the engine drives.
pub trait ReviewHost {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists the open proposals targeting the watched trunk, with their full
    /// comment histories, in listing order.
    fn open_proposals(&self) -> impl Future<Output = Result<Vec<MergeProposal>, Self::Error>> + Send;

    /// Posts a comment on a proposal.
    fn post_comment(
        &self,
        proposal: &MergeProposal,
        content: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// ─── Wire format ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JsonCollection<T> {
    entries: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct JsonMergeProposal {
    self_link: String,
    all_comments_collection_link: String,
    source_branch_link: String,
    target_branch_link: String,
    commit_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonComment {
    message_body: String,
}

/// Turns a branch API link into the branch's unique name.
fn branch_from_link(link: &str) -> HostResult<Branch> {
    let unique_name = link
        .strip_prefix(LP_API)
        .ok_or_else(|| HostError::ForeignBranchLink {
            link: link.to_string(),
        })?;
    Ok(Branch::new(BranchName::new(unique_name)))
}

// ─── Client ─────────────────────────────────────────────────────────────────

/// The reqwest-backed review host client, scoped to one trunk branch.
pub struct LaunchpadClient {
    client: reqwest::Client,
    credentials: Credentials,
    retry: RetryPolicy,
    /// Unique name of the branch whose proposals are watched.
    trunk: BranchName,
}

impl LaunchpadClient {
    pub fn new(
        client: reqwest::Client,
        credentials: Credentials,
        retry: RetryPolicy,
        trunk: BranchName,
    ) -> Self {
        LaunchpadClient {
            client,
            credentials,
            retry,
            trunk,
        }
    }

    /// GETs and decodes a JSON resource, retrying transient failures.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> HostResult<T> {
        let response = self
            .retry
            .run(classify_host_error, || async {
                let response = self
                    .client
                    .get(url)
                    .query(query)
                    .send()
                    .await
                    .map_err(|source| HostError::Request {
                        url: url.to_string(),
                        source,
                    })?;
                if !response.status().is_success() {
                    return Err(HostError::Status {
                        url: url.to_string(),
                        status: response.status().as_u16(),
                    });
                }
                Ok(response)
            })
            .await?;

        response.json().await.map_err(|source| HostError::Payload {
            url: url.to_string(),
            source,
        })
    }

    /// The subject the host itself uses for proposal mail, so threads are
    /// not broken in mail clients.
    fn comment_subject(proposal: &MergeProposal) -> String {
        format!(
            "[Merge] lp:{} into lp:{}",
            proposal.source_branch.name, proposal.target_branch.name
        )
    }

    fn oauth_header(&self) -> String {
        let nonce: u64 = rand::thread_rng().gen();
        format!(
            "OAuth realm=\"{}/\", \
             oauth_consumer_key=\"{}\", \
             oauth_token=\"{}\", \
             oauth_signature_method=\"PLAINTEXT\", \
             oauth_signature=\"%26{}\", \
             oauth_timestamp=\"{}\", \
             oauth_nonce=\"{}\", \
             oauth_version=\"1.0\"",
            API_BASE,
            self.credentials.consumer_key,
            self.credentials.access_token,
            self.credentials.access_secret,
            Utc::now().timestamp(),
            nonce
        )
    }
}

fn classify_host_error(err: &HostError) -> FailureKind {
    match err {
        HostError::Request { source, .. } => classify_http_error(source),
        _ => FailureKind::Fatal,
    }
}

impl ReviewHost for LaunchpadClient {
    type Error = HostError;

    async fn open_proposals(&self) -> HostResult<Vec<MergeProposal>> {
        let url = format!("{}{}", LP_API, self.trunk);
        let listing: JsonCollection<JsonMergeProposal> = self
            .get_json(
                &url,
                &[("ws.op", "getMergeProposals"), ("status", "Needs review")],
            )
            .await?;

        let mut proposals = Vec::with_capacity(listing.entries.len());
        for entry in listing.entries {
            let comments: JsonCollection<JsonComment> = self
                .get_json(&entry.all_comments_collection_link, &[])
                .await?;
            proposals.push(MergeProposal {
                source_branch: branch_from_link(&entry.source_branch_link)?,
                target_branch: branch_from_link(&entry.target_branch_link)?,
                commit_message: entry.commit_message,
                comments: comments
                    .entries
                    .into_iter()
                    .map(|c| Comment::new(c.message_body))
                    .collect(),
                self_link: entry.self_link,
            });
        }
        Ok(proposals)
    }

    async fn post_comment(&self, proposal: &MergeProposal, content: &str) -> HostResult<()> {
        let subject = Self::comment_subject(proposal);
        let mut fields = HashMap::new();
        fields.insert("ws.op", "createComment");
        fields.insert("subject", subject.as_str());
        fields.insert("content", content);

        let url = proposal.self_link.as_str();
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.oauth_header())
            .form(&fields)
            .send()
            .await
            .map_err(|source| HostError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(HostError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_link_parses_unique_name() {
        let branch =
            branch_from_link("https://api.launchpad.net/1.0/~org/proj/feature").unwrap();
        assert_eq!(branch.name.as_str(), "~org/proj/feature");
        assert_eq!(branch.slug.as_str(), "_org_proj_feature");
    }

    #[test]
    fn foreign_branch_link_is_rejected() {
        assert!(matches!(
            branch_from_link("https://example.com/~org/proj/feature"),
            Err(HostError::ForeignBranchLink { .. })
        ));
    }

    #[test]
    fn comment_subject_matches_host_threading() {
        let proposal = MergeProposal {
            source_branch: Branch::new("~org/proj/feature"),
            target_branch: Branch::new("~org/proj/trunk"),
            commit_message: None,
            comments: vec![],
            self_link: "mp-1".to_string(),
        };
        assert_eq!(
            LaunchpadClient::comment_subject(&proposal),
            "[Merge] lp:~org/proj/feature into lp:~org/proj/trunk"
        );
    }

    #[test]
    fn proposal_wire_shape() {
        let json = r#"{
            "self_link": "https://api.launchpad.net/1.0/~org/proj/feature/+merge/1",
            "all_comments_collection_link": "https://api.launchpad.net/1.0/~org/proj/feature/+merge/1/all_comments",
            "source_branch_link": "https://api.launchpad.net/1.0/~org/proj/feature",
            "target_branch_link": "https://api.launchpad.net/1.0/~org/proj/trunk",
            "commit_message": null
        }"#;
        let parsed: JsonMergeProposal = serde_json::from_str(json).unwrap();
        assert!(parsed.commit_message.is_none());
        assert!(parsed.self_link.ends_with("/+merge/1"));
    }

    #[test]
    fn credentials_load_reports_missing_file() {
        let err = Credentials::load(Path::new("/nonexistent/credentials.json")).unwrap_err();
        assert!(matches!(err, CredentialsError::Io { .. }));
    }

    #[test]
    fn credentials_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("launchpad_credentials.json");
        std::fs::write(
            &path,
            r#"{"consumer_key": "k", "access_token": "t", "access_secret": "s"}"#,
        )
        .unwrap();
        let credentials = Credentials::load(&path).unwrap();
        assert_eq!(credentials.consumer_key, "k");
        assert_eq!(credentials.access_token, "t");
        assert_eq!(credentials.access_secret, "s");
    }
}
