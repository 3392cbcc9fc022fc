use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::GithubConfig;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DownloadError(pub String);

/// Fetches a release archive to a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Writes the body of `url` to `dest`, replacing any existing file.
    /// Returns the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

/// HTTP(S) downloader. Follows redirects, which release hosts use for archives.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(cfg: &GithubConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DownloadError(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| DownloadError(format!("create {}: {e}", dest.display())))?;

        let mut written = 0u64;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| DownloadError(format!("read body: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError(format!("write {}: {e}", dest.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| DownloadError(format!("flush {}: {e}", dest.display())))?;
        Ok(written)
    }
}
