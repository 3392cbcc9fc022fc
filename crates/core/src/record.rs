use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ReleaseDescriptor, ReleaseId};
use crate::now_ms;

/// Which release an app directory holds.
///
/// Stored as JSON both as the installation record (confirmed running) and as
/// the staged marker (installed, not yet confirmed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationRecord {
    pub release_id: ReleaseId,
    /// Diagnostic only.
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub recorded_at_ms: i64,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallationRecord {
    pub fn for_release(release: &ReleaseDescriptor) -> Self {
        Self {
            release_id: release.id,
            release_name: release.name.clone(),
            recorded_at_ms: now_ms(),
        }
    }

    pub fn matches(&self, release: &ReleaseDescriptor) -> bool {
        self.release_id == release.id
    }

    /// Same release id and name; the timestamp is ignored.
    pub fn describes_same(&self, other: &InstallationRecord) -> bool {
        self.release_id == other.release_id && self.release_name == other.release_name
    }

    /// `Ok(None)` when the file doesn't exist.
    pub async fn load(path: &Path) -> Result<Option<Self>, RecordError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RecordError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| RecordError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub async fn save(&self, path: &Path) -> Result<(), RecordError> {
        let persist = |source: std::io::Error| RecordError::Persist {
            path: path.to_path_buf(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| persist(e.into()))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(persist)?;
        tokio::fs::rename(&tmp, path).await.map_err(persist)?;
        Ok(())
    }

    /// Removes the file; a missing file is fine.
    pub async fn remove(path: &Path) -> Result<(), RecordError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RecordError::Persist {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn release(id: u64) -> ReleaseDescriptor {
        ReleaseDescriptor {
            id: ReleaseId(id),
            name: format!("v{id}"),
            archive_url: format!("https://example.invalid/{id}.zip"),
        }
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempdir().unwrap();
        let loaded = InstallationRecord::load(&dir.path().join(".record")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".record");
        let rec = InstallationRecord::for_release(&release(42));
        rec.save(&path).await.unwrap();

        let loaded = InstallationRecord::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(loaded.matches(&release(42)));
        assert!(!loaded.matches(&release(43)));
        assert!(!dir.path().join(".tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_record_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".record");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let err = InstallationRecord::load(&path).await.unwrap_err();
        assert!(matches!(err, RecordError::Parse { .. }));
    }

    #[tokio::test]
    async fn reads_legacy_record_without_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".record");
        tokio::fs::write(&path, br#"{"release_id": 9}"#).await.unwrap();
        let loaded = InstallationRecord::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.release_id, ReleaseId(9));
        assert_eq!(loaded.release_name, "");
    }

    #[tokio::test]
    async fn remove_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        InstallationRecord::remove(&dir.path().join(".staged")).await.unwrap();
    }
}
