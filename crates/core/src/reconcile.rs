//! One app, one pass: bring its directory and process in line with the
//! resolved release.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::install::{InstallError, InstallOutcome, PackageInstaller};
use crate::layout::AppLayout;
use crate::model::{AppSpec, ProcessNaming, ReleaseDescriptor};
use crate::record::{InstallationRecord, RecordError};
use crate::release::{ReleaseError, ReleaseSource};
use crate::supervisor::{ProcessAction, SupervisorAdapter, SupervisorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PrepareDir,
    ResolveRelease,
    Install,
    EnsureRunning,
    PersistRecord,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PrepareDir => "prepare-dir",
            Phase::ResolveRelease => "resolve-release",
            Phase::Install => "install",
            Phase::EnsureRunning => "ensure-running",
            Phase::PersistRecord => "persist-record",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cannot create {path}: {source}")]
    PrepareDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    ResolveRelease(#[from] ReleaseError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("cannot update staged marker: {0}")]
    Stage(#[source] RecordError),
    #[error(transparent)]
    EnsureRunning(#[from] SupervisorError),
    #[error(transparent)]
    PersistRecord(#[from] RecordError),
}

impl ReconcileError {
    pub fn phase(&self) -> Phase {
        match self {
            Self::PrepareDir { .. } => Phase::PrepareDir,
            Self::ResolveRelease(_) => Phase::ResolveRelease,
            Self::Install(_) | Self::Stage(_) => Phase::Install,
            Self::EnsureRunning(_) => Phase::EnsureRunning,
            Self::PersistRecord(_) => Phase::PersistRecord,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppOutcome {
    pub release: ReleaseDescriptor,
    /// A download and unpack happened in this pass.
    pub installed: bool,
    pub process: ProcessAction,
    pub record_written: bool,
}

#[derive(Clone)]
pub struct AppReconciler {
    layout: AppLayout,
    releases: Arc<dyn ReleaseSource>,
    installer: PackageInstaller,
    supervisor: SupervisorAdapter,
    naming: ProcessNaming,
}

impl AppReconciler {
    pub fn new(
        layout: AppLayout,
        releases: Arc<dyn ReleaseSource>,
        installer: PackageInstaller,
        supervisor: SupervisorAdapter,
        naming: ProcessNaming,
    ) -> Self {
        Self {
            layout,
            releases,
            installer,
            supervisor,
            naming,
        }
    }

    pub fn layout(&self) -> &AppLayout {
        &self.layout
    }

    pub async fn run(&self, app: &AppSpec) -> Result<AppOutcome, ReconcileError> {
        let span = info_span!("app", id = %app.id, repo = %app.repo);
        self.run_inner(app).instrument(span).await
    }

    async fn run_inner(&self, app: &AppSpec) -> Result<AppOutcome, ReconcileError> {
        let install_dir = self.layout.app_dir(&app.id);
        tokio::fs::create_dir_all(&install_dir)
            .await
            .map_err(|source| ReconcileError::PrepareDir {
                path: install_dir.clone(),
                source,
            })?;

        let record_path = self.layout.record_path(&app.id);
        let staged_path = self.layout.staged_path(&app.id);
        let record = load_or_warn(&record_path).await;
        let staged = load_or_warn(&staged_path).await;

        let release = self.releases.resolve(&app.repo).await?;
        info!(release = %release.id, name = %release.name, "release resolved");

        // An install that finished but never got confirmed running counts as
        // current for the release it names.
        let staged_matches = staged.as_ref().is_some_and(|s| s.matches(&release));
        let prior = if staged_matches {
            staged.as_ref()
        } else {
            record.as_ref()
        };
        // A marker for another release no longer describes the directory once
        // a new install starts writing into it.
        if staged.is_some() && !staged_matches {
            InstallationRecord::remove(&staged_path)
                .await
                .map_err(ReconcileError::Stage)?;
        }

        let outcome = self
            .installer
            .install(app, &install_dir, prior, &release)
            .await?;
        let installed = matches!(outcome, InstallOutcome::Installed { .. });
        let new_record = InstallationRecord::for_release(&release);
        if installed {
            new_record
                .save(&staged_path)
                .await
                .map_err(ReconcileError::Stage)?;
        }

        let process = self
            .supervisor
            .ensure_running(&self.naming.process_name(&app.id), &install_dir)
            .await?;

        let record_written = !record
            .as_ref()
            .is_some_and(|r| r.describes_same(&new_record));
        if record_written {
            new_record.save(&record_path).await?;
        }
        if installed || staged.is_some() {
            InstallationRecord::remove(&staged_path).await?;
        }

        info!(
            release = %release.id,
            installed,
            process = ?process,
            record_written,
            "app reconciled"
        );
        Ok(AppOutcome {
            release,
            installed,
            process,
            record_written,
        })
    }
}

/// Unreadable state files count as absent.
async fn load_or_warn(path: &std::path::Path) -> Option<InstallationRecord> {
    match InstallationRecord::load(path).await {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable state file");
            None
        }
    }
}
