//! Resolving an app's release intent into a concrete downloadable release.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ReleaseDescriptor, RepoRef};

mod github;

pub use github::{Credentials, GithubReleaseSource};

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("{wanted} not found for {repo}")]
    NotFound { repo: String, wanted: String },
    #[error("release host rejected credentials for {repo} (status {status})")]
    Auth { repo: String, status: u16 },
    #[error("rate limited by release host while resolving {repo}")]
    RateLimited { repo: String },
    #[error("release lookup for {repo} failed: {message}")]
    Transient { repo: String, message: String },
    #[error("unexpected release payload for {repo}: {message}")]
    Decode { repo: String, message: String },
}

/// Source of releases for a repository.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Latest release when the repo pins none, otherwise the pinned release.
    async fn resolve(&self, repo: &RepoRef) -> Result<ReleaseDescriptor, ReleaseError>;
}

pub(crate) fn describe_wanted(repo: &RepoRef) -> String {
    match repo.desired_release() {
        Some(id) => format!("release {id}"),
        None => "latest release".to_string(),
    }
}
