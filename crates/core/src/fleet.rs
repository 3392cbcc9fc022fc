//! Whole-fleet pass: orphan cleanup, then every declared app in turn.

use std::collections::{BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::install::{DependencyCommand, Downloader, PackageInstaller};
use crate::layout::{AppLayout, RECORD_FILE, STAGED_FILE};
use crate::model::{AppSpec, ProcessNaming};
use crate::reconcile::{AppOutcome, AppReconciler};
use crate::release::ReleaseSource;
use crate::supervisor::{ProcessSupervisor, SupervisorAdapter};
use crate::validation::{validate_app_id, ValidationError};

/// Long-lived service handles. Settings that can change between cycles live
/// in [`Config`] instead.
#[derive(Clone)]
pub struct Backends {
    pub releases: Arc<dyn ReleaseSource>,
    pub downloader: Arc<dyn Downloader>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// App ids whose process and/or directory were removed.
    pub removed: Vec<String>,
    /// `(app id or process name, error)`.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub cleanup: CleanupReport,
    pub succeeded: Vec<(String, AppOutcome)>,
    /// `(app id, "phase: error")`.
    pub failed: Vec<(String, String)>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.cleanup.failed.is_empty()
    }
}

pub struct FleetReconciler {
    apps: AppReconciler,
    supervisor: SupervisorAdapter,
    naming: ProcessNaming,
}

impl FleetReconciler {
    pub fn new(apps: AppReconciler, supervisor: SupervisorAdapter, naming: ProcessNaming) -> Self {
        Self {
            apps,
            supervisor,
            naming,
        }
    }

    /// Wires a reconciler for one cycle from a config snapshot.
    pub fn from_config(
        config: &Config,
        apps_root: PathBuf,
        backends: &Backends,
    ) -> Result<Self, ValidationError> {
        let m = &config.maintenance;
        let deps = DependencyCommand::from_argv(&m.dependency_command, m.fail_on_stderr)
            .ok_or(ValidationError::EmptyDependencyCommand)?;
        let naming = ProcessNaming::new(m.process_prefix.clone());
        let supervisor = SupervisorAdapter::new(backends.supervisor.clone());
        let apps = AppReconciler::new(
            AppLayout::new(apps_root),
            backends.releases.clone(),
            PackageInstaller::new(backends.downloader.clone(), deps),
            supervisor.clone(),
            naming.clone(),
        );
        Ok(Self::new(apps, supervisor, naming))
    }

    fn layout(&self) -> &AppLayout {
        self.apps.layout()
    }

    /// Cleanup first, then each app sequentially. Nothing here fails the
    /// cycle as a whole.
    pub async fn reconcile_all(&self, apps: &[AppSpec]) -> CycleReport {
        let mut report = CycleReport {
            cleanup: self.cleanup_orphans(apps).await,
            ..Default::default()
        };

        for app in apps {
            match self.apps.run(app).await {
                Ok(outcome) => report.succeeded.push((app.id.clone(), outcome)),
                Err(e) => {
                    error!(app = %app.id, phase = %e.phase(), error = %e, "app reconciliation failed");
                    report
                        .failed
                        .push((app.id.clone(), format!("{}: {e}", e.phase())));
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            orphans_removed = report.cleanup.removed.len(),
            "cycle finished"
        );
        report
    }

    /// Removes supervisor processes and app directories that no declared app
    /// accounts for.
    pub async fn cleanup_orphans(&self, declared: &[AppSpec]) -> CleanupReport {
        let declared: HashSet<&str> = declared.iter().map(|a| a.id.as_str()).collect();
        let mut report = CleanupReport::default();
        let mut removed = BTreeSet::new();
        // Directories of processes we failed to stop stay until the next cycle.
        let mut still_running = HashSet::new();

        match self.supervisor.list_managed(&self.naming).await {
            Ok(processes) => {
                for process in processes {
                    let Some(id) = self.naming.app_id(&process.name) else {
                        continue;
                    };
                    if declared.contains(id) {
                        continue;
                    }
                    if let Err(e) = self.supervisor.remove(&process.name).await {
                        warn!(process = %process.name, error = %e, "failed to remove orphan process");
                        report.failed.push((process.name.clone(), e.to_string()));
                        still_running.insert(id.to_string());
                        continue;
                    }
                    info!(process = %process.name, "orphan process removed");
                    if validate_app_id(id).is_err() {
                        removed.insert(id.to_string());
                        continue;
                    }
                    match remove_app_dir(&self.layout().app_dir(id)).await {
                        Ok(()) => {
                            removed.insert(id.to_string());
                        }
                        Err(e) => {
                            warn!(app = id, error = %e, "failed to remove orphan directory");
                            report.failed.push((id.to_string(), e.to_string()));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot list supervised processes, skipping cleanup");
                report.failed.push((self.naming.prefix().to_string(), e.to_string()));
                return report;
            }
        }

        for id in self.disk_orphans(&declared).await {
            if removed.contains(&id) || still_running.contains(&id) {
                continue;
            }
            match remove_app_dir(&self.layout().app_dir(&id)).await {
                Ok(()) => {
                    info!(app = %id, "orphan directory removed");
                    removed.insert(id);
                }
                Err(e) => {
                    warn!(app = %id, error = %e, "failed to remove orphan directory");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        report.removed = removed.into_iter().collect();
        report
    }

    /// Undeclared directories under the apps root that carry our state files.
    async fn disk_orphans(&self, declared: &HashSet<&str>) -> Vec<String> {
        let root = self.layout().root();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "cannot scan apps root");
                return Vec::new();
            }
        };

        let mut orphans = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "apps root scan interrupted");
                    break;
                }
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if declared.contains(name.as_str()) {
                continue;
            }
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && holds_state(&path).await {
                orphans.push(name);
            }
        }
        orphans.sort();
        orphans
    }
}

async fn holds_state(dir: &Path) -> bool {
    for file in [RECORD_FILE, STAGED_FILE] {
        if tokio::fs::try_exists(dir.join(file)).await.unwrap_or(false) {
            return true;
        }
    }
    false
}

async fn remove_app_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
