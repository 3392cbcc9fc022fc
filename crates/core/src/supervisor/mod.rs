//! Process supervisor seam plus the adapter the reconcilers drive.

mod memory;
mod pm2;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::layout::manifest_path;
use crate::model::{ManagedProcess, ProcessNaming, ProcessStatus};

pub use memory::MemorySupervisor;
pub use pm2::Pm2Supervisor;

/// Script started when the manifest names none.
pub const DEFAULT_SCRIPT: &str = "index.js";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("cannot connect to supervisor: {0}")]
    Connect(String),
    #[error("cannot list processes: {0}")]
    List(String),
    #[error("cannot start {name}: {message}")]
    Start { name: String, message: String },
    #[error("cannot restart {name}: {message}")]
    Restart { name: String, message: String },
    #[error("cannot delete {name}: {message}")]
    Delete { name: String, message: String },
    #[error("cannot persist process table: {0}")]
    Persist(String),
    #[error("cannot read manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSpec {
    pub name: String,
    pub script: String,
    pub cwd: PathBuf,
}

/// Low-level supervisor operations. Each call may fail on its own; the
/// adapter attaches the phase.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn connect(&self) -> Result<(), String>;
    async fn disconnect(&self);
    async fn list(&self) -> Result<Vec<ManagedProcess>, String>;
    async fn start(&self, spec: &StartSpec) -> Result<(), String>;
    async fn restart(&self, name: &str) -> Result<(), String>;
    async fn delete(&self, name: &str) -> Result<(), String>;
    /// Saves the current process table so it survives a supervisor restart.
    async fn persist(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAction {
    Started,
    Restarted,
    AlreadyRunning,
}

/// Session-scoped operations over a [`ProcessSupervisor`]. Every public call
/// connects first and disconnects on every exit path.
#[derive(Clone)]
pub struct SupervisorAdapter {
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl SupervisorAdapter {
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self { supervisor }
    }

    pub async fn ensure_running(
        &self,
        name: &str,
        install_dir: &Path,
    ) -> Result<ProcessAction, SupervisorError> {
        self.supervisor
            .connect()
            .await
            .map_err(SupervisorError::Connect)?;
        let result = self.ensure_running_connected(name, install_dir).await;
        self.supervisor.disconnect().await;
        result
    }

    async fn ensure_running_connected(
        &self,
        name: &str,
        install_dir: &Path,
    ) -> Result<ProcessAction, SupervisorError> {
        let processes = self.supervisor.list().await.map_err(SupervisorError::List)?;
        let existing = processes.into_iter().find(|p| p.name == name);

        let Some(process) = existing else {
            let script = entry_script(install_dir).await?;
            let spec = StartSpec {
                name: name.to_string(),
                script,
                cwd: install_dir.to_path_buf(),
            };
            self.supervisor
                .start(&spec)
                .await
                .map_err(|message| SupervisorError::Start {
                    name: name.to_string(),
                    message,
                })?;
            self.supervisor
                .persist()
                .await
                .map_err(SupervisorError::Persist)?;
            info!(process = name, script = %spec.script, "process started");
            return Ok(ProcessAction::Started);
        };

        match process.status {
            status if status.needs_restart() => {
                self.supervisor
                    .restart(name)
                    .await
                    .map_err(|message| SupervisorError::Restart {
                        name: name.to_string(),
                        message,
                    })?;
                info!(process = name, previous = status.as_str(), "process restarted");
                Ok(ProcessAction::Restarted)
            }
            ProcessStatus::Online | ProcessStatus::Launching => {
                debug!(process = name, "already running");
                Ok(ProcessAction::AlreadyRunning)
            }
            other => {
                warn!(process = name, status = other.as_str(), "unrecognised process status, leaving as is");
                Ok(ProcessAction::AlreadyRunning)
            }
        }
    }

    /// Processes whose name carries the managed prefix.
    pub async fn list_managed(
        &self,
        naming: &ProcessNaming,
    ) -> Result<Vec<ManagedProcess>, SupervisorError> {
        self.supervisor
            .connect()
            .await
            .map_err(SupervisorError::Connect)?;
        let result = self
            .supervisor
            .list()
            .await
            .map(|all| {
                all.into_iter()
                    .filter(|p| naming.app_id(&p.name).is_some())
                    .collect()
            })
            .map_err(SupervisorError::List);
        self.supervisor.disconnect().await;
        result
    }

    /// Deletes `name` and persists the resulting table.
    pub async fn remove(&self, name: &str) -> Result<(), SupervisorError> {
        self.supervisor
            .connect()
            .await
            .map_err(SupervisorError::Connect)?;
        let result = async {
            self.supervisor
                .delete(name)
                .await
                .map_err(|message| SupervisorError::Delete {
                    name: name.to_string(),
                    message,
                })?;
            self.supervisor
                .persist()
                .await
                .map_err(SupervisorError::Persist)
        }
        .await;
        self.supervisor.disconnect().await;
        result
    }
}

/// `main` from the app's package.json, or [`DEFAULT_SCRIPT`].
async fn entry_script(install_dir: &Path) -> Result<String, SupervisorError> {
    let path = manifest_path(install_dir);
    let manifest_err = |message: String| SupervisorError::Manifest {
        path: path.clone(),
        message,
    };
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|e| manifest_err(e.to_string()))?;
    let manifest: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|e| manifest_err(e.to_string()))?;
    Ok(manifest
        .get("main")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SCRIPT)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn app_dir(manifest: &str) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), manifest).unwrap();
        dir
    }

    #[tokio::test]
    async fn unknown_process_is_started_and_persisted() {
        let sup = Arc::new(MemorySupervisor::new());
        let adapter = SupervisorAdapter::new(sup.clone());
        let dir = app_dir(r#"{"main":"server.js"}"#);

        let action = adapter.ensure_running("managed.web", dir.path()).await.unwrap();
        assert_eq!(action, ProcessAction::Started);

        let started = sup.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].script, "server.js");
        assert_eq!(started[0].cwd, dir.path());
        assert_eq!(sup.persisted_names(), vec!["managed.web".to_string()]);
        assert_eq!(sup.connects(), sup.disconnects());
    }

    #[tokio::test]
    async fn missing_main_defaults_to_index() {
        let sup = Arc::new(MemorySupervisor::new());
        let dir = app_dir(r#"{"name":"web"}"#);
        SupervisorAdapter::new(sup.clone())
            .ensure_running("managed.web", dir.path())
            .await
            .unwrap();
        assert_eq!(sup.started()[0].script, DEFAULT_SCRIPT);
    }

    #[tokio::test]
    async fn stopped_and_errored_are_restarted() {
        let dir = app_dir("{}");
        for status in [ProcessStatus::Stopped, ProcessStatus::Errored, ProcessStatus::Stopping] {
            let sup = Arc::new(MemorySupervisor::new());
            sup.insert("managed.web", status);
            let action = SupervisorAdapter::new(sup.clone())
                .ensure_running("managed.web", dir.path())
                .await
                .unwrap();
            assert_eq!(action, ProcessAction::Restarted);
            assert_eq!(sup.restarts(), vec!["managed.web".to_string()]);
            assert_eq!(sup.status("managed.web"), Some(ProcessStatus::Online));
        }
    }

    #[tokio::test]
    async fn online_and_unknown_status_are_left_alone() {
        let dir = app_dir("{}");
        for status in [
            ProcessStatus::Online,
            ProcessStatus::Launching,
            ProcessStatus::Other("one-launch-status".into()),
        ] {
            let sup = Arc::new(MemorySupervisor::new());
            sup.insert("managed.web", status);
            let action = SupervisorAdapter::new(sup.clone())
                .ensure_running("managed.web", dir.path())
                .await
                .unwrap();
            assert_eq!(action, ProcessAction::AlreadyRunning);
            assert!(sup.restarts().is_empty());
            assert!(sup.started().is_empty());
        }
    }

    #[tokio::test]
    async fn name_match_is_exact() {
        let sup = Arc::new(MemorySupervisor::new());
        sup.insert("managed.web2", ProcessStatus::Online);
        let dir = app_dir("{}");
        let action = SupervisorAdapter::new(sup.clone())
            .ensure_running("managed.web", dir.path())
            .await
            .unwrap();
        assert_eq!(action, ProcessAction::Started);
    }

    #[tokio::test]
    async fn failures_still_disconnect() {
        let sup = Arc::new(MemorySupervisor::new());
        sup.fail_on("start");
        let dir = app_dir("{}");
        let err = SupervisorAdapter::new(sup.clone())
            .ensure_running("managed.web", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Start { .. }));
        assert_eq!(sup.connects(), 1);
        assert_eq!(sup.disconnects(), 1);
    }

    #[tokio::test]
    async fn missing_manifest_is_a_manifest_error() {
        let sup = Arc::new(MemorySupervisor::new());
        let dir = tempdir().unwrap();
        let err = SupervisorAdapter::new(sup.clone())
            .ensure_running("managed.web", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Manifest { .. }));
        assert_eq!(sup.connects(), sup.disconnects());
    }

    #[tokio::test]
    async fn connect_failure_skips_disconnect() {
        let sup = Arc::new(MemorySupervisor::new());
        sup.fail_on("connect");
        let err = SupervisorAdapter::new(sup.clone())
            .list_managed(&ProcessNaming::new("managed."))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Connect(_)));
        assert_eq!(sup.disconnects(), 0);
    }

    #[tokio::test]
    async fn list_managed_filters_by_prefix_and_remove_persists() {
        let sup = Arc::new(MemorySupervisor::new());
        sup.insert("managed.a", ProcessStatus::Online);
        sup.insert("managed.b", ProcessStatus::Stopped);
        sup.insert("other", ProcessStatus::Online);
        let adapter = SupervisorAdapter::new(sup.clone());

        let mut names: Vec<_> = adapter
            .list_managed(&ProcessNaming::new("managed."))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["managed.a", "managed.b"]);

        adapter.remove("managed.b").await.unwrap();
        assert_eq!(sup.status("managed.b"), None);
        assert!(!sup.persisted_names().contains(&"managed.b".to_string()));
        assert_eq!(sup.connects(), sup.disconnects());
    }
}
