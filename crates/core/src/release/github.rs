use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{describe_wanted, ReleaseError, ReleaseSource};
use crate::config::GithubConfig;
use crate::model::{ReleaseDescriptor, ReleaseId, RepoRef};

/// Basic-auth credentials; raises the host's rate limit.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Release source backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubReleaseSource {
    client: Client,
    api_base: String,
    credentials: Option<Credentials>,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    zipball_url: Option<String>,
}

impl GithubReleaseSource {
    pub fn new(cfg: &GithubConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        let credentials = match (&cfg.username, &cfg.token) {
            (Some(username), Some(token)) if !username.is_empty() && !token.is_empty() => {
                Some(Credentials {
                    username: username.clone(),
                    token: token.clone(),
                })
            }
            _ => None,
        };
        Ok(Self::with_client(client, cfg.api_base.clone(), credentials))
    }

    pub fn with_client(client: Client, api_base: String, credentials: Option<Credentials>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn release_url(&self, repo: &RepoRef) -> String {
        match repo.desired_release() {
            Some(id) => format!(
                "{}/repos/{}/{}/releases/{}",
                self.api_base, repo.owner, repo.name, id
            ),
            None => format!(
                "{}/repos/{}/{}/releases/latest",
                self.api_base, repo.owner, repo.name
            ),
        }
    }
}

#[async_trait]
impl ReleaseSource for GithubReleaseSource {
    async fn resolve(&self, repo: &RepoRef) -> Result<ReleaseDescriptor, ReleaseError> {
        let url = self.release_url(repo);
        debug!(%url, authenticated = self.credentials.is_some(), "resolving release");

        let mut req = self
            .client
            .get(&url)
            .header("accept", "application/vnd.github+json");
        // Credentials go on each request, never on the shared client.
        if let Some(c) = &self.credentials {
            req = req.basic_auth(&c.username, Some(&c.token));
        }

        let resp = req.send().await.map_err(|e| ReleaseError::Transient {
            repo: repo.to_string(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let remaining = resp
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(classify_status(repo, status, remaining.as_deref()));
        }

        let release: GithubRelease = resp.json().await.map_err(|e| ReleaseError::Decode {
            repo: repo.to_string(),
            message: e.to_string(),
        })?;
        into_descriptor(repo, release)
    }
}

fn classify_status(repo: &RepoRef, status: StatusCode, ratelimit_remaining: Option<&str>) -> ReleaseError {
    match status {
        StatusCode::NOT_FOUND => ReleaseError::NotFound {
            repo: repo.to_string(),
            wanted: describe_wanted(repo),
        },
        StatusCode::FORBIDDEN if ratelimit_remaining == Some("0") => ReleaseError::RateLimited {
            repo: repo.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => ReleaseError::RateLimited {
            repo: repo.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ReleaseError::Auth {
            repo: repo.to_string(),
            status: status.as_u16(),
        },
        other => ReleaseError::Transient {
            repo: repo.to_string(),
            message: format!("unexpected status {other}"),
        },
    }
}

fn into_descriptor(repo: &RepoRef, r: GithubRelease) -> Result<ReleaseDescriptor, ReleaseError> {
    let archive_url = r.zipball_url.ok_or_else(|| ReleaseError::Decode {
        repo: repo.to_string(),
        message: format!("release {} has no zipball_url", r.id),
    })?;
    let name = r
        .name
        .filter(|n| !n.is_empty())
        .or(r.tag_name)
        .unwrap_or_default();
    Ok(ReleaseDescriptor {
        id: ReleaseId(r.id),
        name,
        archive_url,
    })
}
