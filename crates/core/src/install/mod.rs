//! Puts a resolved release on disk: download, flatten-unpack, dependency install.

mod deps;
mod download;
mod unpack;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::{archive_path, manifest_path};
use crate::model::{AppSpec, ReleaseDescriptor};
use crate::record::InstallationRecord;

pub use deps::{DependencyCommand, DependencyFailure};
pub use download::{DownloadError, Downloader, HttpDownloader};
pub use unpack::{extract_flattened, UnpackError};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to prepare {path}: {source}")]
    DirPrep {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },
    #[error("unpacking {path} failed: {message}")]
    Unpack { path: PathBuf, message: String },
    #[error("`{command}` in {dir} {reason}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    DependencyInstall {
        command: String,
        dir: PathBuf,
        reason: String,
        stdout: String,
        stderr: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The prior record already names this release; nothing was touched.
    AlreadyCurrent,
    Installed { files: usize },
}

/// Stateless installer. The caller decides which prior record to pass.
#[derive(Clone)]
pub struct PackageInstaller {
    downloader: Arc<dyn Downloader>,
    dependencies: DependencyCommand,
}

impl PackageInstaller {
    pub fn new(downloader: Arc<dyn Downloader>, dependencies: DependencyCommand) -> Self {
        Self {
            downloader,
            dependencies,
        }
    }

    pub async fn install(
        &self,
        app: &AppSpec,
        install_dir: &Path,
        prior: Option<&InstallationRecord>,
        release: &ReleaseDescriptor,
    ) -> Result<InstallOutcome, InstallError> {
        if prior.is_some_and(|p| p.matches(release)) {
            debug!(release = %release.id, "already installed");
            return Ok(InstallOutcome::AlreadyCurrent);
        }

        if prior.is_none() {
            clear_dir(install_dir).await?;
        }

        let archive = archive_path(install_dir);
        let bytes = self
            .downloader
            .download(&release.archive_url, &archive)
            .await
            .map_err(|e| InstallError::Download {
                url: release.archive_url.clone(),
                message: e.to_string(),
            })?;
        debug!(bytes, url = %release.archive_url, "archive downloaded");

        let files = {
            let archive = archive.clone();
            let dest = install_dir.to_path_buf();
            tokio::task::spawn_blocking(move || extract_flattened(&archive, &dest))
                .await
                .map_err(|e| InstallError::Unpack {
                    path: archive_path(install_dir),
                    message: e.to_string(),
                })?
                .map_err(|e| InstallError::Unpack {
                    path: archive_path(install_dir),
                    message: e.to_string(),
                })?
        };
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!(path = %archive.display(), error = %e, "failed to remove archive");
        }

        let stdout = self
            .dependencies
            .run(install_dir)
            .await
            .map_err(|f| InstallError::DependencyInstall {
                command: self.dependencies.display(),
                dir: install_dir.to_path_buf(),
                reason: f.reason,
                stdout: f.stdout,
                stderr: f.stderr,
            })?;
        if !stdout.is_empty() {
            debug!(output = %stdout, "dependency install output");
        }

        check_manifest_name(install_dir, &app.repo.name).await;
        info!(release = %release.id, files, "release installed");
        Ok(InstallOutcome::Installed { files })
    }
}

/// Removes everything inside `dir`, keeping `dir` itself.
async fn clear_dir(dir: &Path) -> Result<(), InstallError> {
    let prep = |source: std::io::Error| InstallError::DirPrep {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(prep)?;
    let mut entries = tokio::fs::read_dir(dir).await.map_err(prep)?;
    while let Some(entry) = entries.next_entry().await.map_err(prep)? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(prep)?;
        if file_type.is_dir() {
            tokio::fs::remove_dir_all(&path).await.map_err(prep)?;
        } else {
            tokio::fs::remove_file(&path).await.map_err(prep)?;
        }
    }
    Ok(())
}

async fn check_manifest_name(install_dir: &Path, expected: &str) {
    let Ok(raw) = tokio::fs::read(manifest_path(install_dir)).await else {
        return;
    };
    let Ok(manifest) = serde_json::from_slice::<serde_json::Value>(&raw) else {
        return;
    };
    if let Some(name) = manifest.get("name").and_then(|v| v.as_str()) {
        if name != expected {
            warn!(package = name, repo = expected, "package name differs from repository name");
        }
    }
}
