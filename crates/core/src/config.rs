use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::model::AppSpec;
use crate::validation::{validate_app, validate_config, validate_maintenance, ValidationError};

/// Daemon configuration file.
///
/// Missing sections and fields take their defaults, unknown fields are
/// rejected so typos don't silently fall back to a default.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub maintenance: MaintenanceConfig,
    pub web: WebConfig,
    pub github: GithubConfig,
    pub apps: Vec<AppSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceConfig {
    /// Delay between the end of one cycle and the start of the next.
    pub period_ms: u64,
    /// Delay before the first cycle after startup.
    pub start_delay_ms: u64,
    /// Install root. Relative paths resolve against the config file's directory.
    pub apps_path: String,
    /// Prefix that marks supervisor processes owned by this daemon.
    pub process_prefix: String,
    /// Program and arguments run in the install directory after unpacking.
    pub dependency_command: Vec<String>,
    /// Treat any stderr output from the dependency command as a failure.
    pub fail_on_stderr: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            period_ms: 10 * 60 * 1000,
            start_delay_ms: 0,
            apps_path: "apps".to_string(),
            process_prefix: "managed.".to_string(),
            dependency_command: vec!["npm".to_string(), "update".to_string()],
            fail_on_stderr: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WebConfig {
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3100".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GithubConfig {
    pub api_base: String,
    pub user_agent: String,
    /// Basic-auth user. Anonymous requests are used unless both user and token are set.
    pub username: Option<String>,
    pub token: Option<String>,
    /// Per-request timeout for API calls and archive downloads.
    pub timeout_ms: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            user_agent: "appkeeper".to_string(),
            username: None,
            token: None,
            timeout_ms: 30_000,
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config =
            serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        validate_config(&cfg).with_context(|| format!("validate {}", path.display()))?;
        Ok(cfg)
    }

    /// Loads the config, writing a default one first if the file doesn't exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no config found, writing defaults");
            Config::default().save_to(path)?;
        }
        Self::load_from(path)
    }

    /// Writes through a sibling temp file so a crash never leaves a torn config.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(self).context("serialize config")?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }

    pub fn apps_root(&self, base_dir: &Path) -> PathBuf {
        make_abs(base_dir, Path::new(&self.maintenance.apps_path))
    }
}

fn make_abs(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Partial update of [`MaintenanceConfig`] from the management API.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenancePatch {
    pub period_ms: Option<u64>,
    pub start_delay_ms: Option<u64>,
    pub apps_path: Option<String>,
    pub process_prefix: Option<String>,
    pub dependency_command: Option<Vec<String>>,
    pub fail_on_stderr: Option<bool>,
}

impl MaintenancePatch {
    /// The apps root and process prefix locate what earlier cycles installed
    /// and started, so they can't move under a running daemon. Restating the
    /// current value is fine.
    pub fn check_startup_only(&self, current: &MaintenanceConfig) -> Result<(), ValidationError> {
        if self.apps_path.as_ref().is_some_and(|p| *p != current.apps_path) {
            return Err(ValidationError::StartupOnly("apps_path"));
        }
        if self
            .process_prefix
            .as_ref()
            .is_some_and(|p| *p != current.process_prefix)
        {
            return Err(ValidationError::StartupOnly("process_prefix"));
        }
        Ok(())
    }

    pub fn apply_to(self, m: &mut MaintenanceConfig) {
        if let Some(v) = self.period_ms {
            m.period_ms = v;
        }
        if let Some(v) = self.start_delay_ms {
            m.start_delay_ms = v;
        }
        if let Some(v) = self.apps_path {
            m.apps_path = v;
        }
        if let Some(v) = self.process_prefix {
            m.process_prefix = v;
        }
        if let Some(v) = self.dependency_command {
            m.dependency_command = v;
        }
        if let Some(v) = self.fail_on_stderr {
            m.fail_on_stderr = v;
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigEditError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("app '{0}' not found")]
    NotFound(String),
    #[error("failed to save config: {0:#}")]
    Save(anyhow::Error),
}

/// Shared, persisted configuration.
///
/// Readers take deep-copied snapshots; edits are validated, written to disk,
/// and only then become visible to the next snapshot.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<Config>,
}

impl ConfigStore {
    pub fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            inner: RwLock::new(config),
        }
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        let config = Config::load_or_create(&path)?;
        Ok(Self::new(path, config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative paths in the config resolve against.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub async fn snapshot(&self) -> Config {
        self.inner.read().await.clone()
    }

    pub async fn apps_root(&self) -> PathBuf {
        self.inner.read().await.apps_root(&self.base_dir())
    }

    pub async fn add_app(&self, app: AppSpec) -> Result<(), ConfigEditError> {
        validate_app(&app)?;
        self.edit(|cfg| {
            if cfg.apps.iter().any(|a| a.id == app.id) {
                return Err(ValidationError::DuplicateAppId(app.id.clone()).into());
            }
            cfg.apps.push(app);
            Ok(())
        })
        .await
    }

    pub async fn remove_app(&self, id: &str) -> Result<AppSpec, ConfigEditError> {
        let mut removed = None;
        self.edit(|cfg| {
            let idx = cfg
                .apps
                .iter()
                .position(|a| a.id == id)
                .ok_or_else(|| ConfigEditError::NotFound(id.to_string()))?;
            removed = Some(cfg.apps.remove(idx));
            Ok(())
        })
        .await?;
        removed.ok_or_else(|| ConfigEditError::NotFound(id.to_string()))
    }

    pub async fn update_maintenance(
        &self,
        patch: MaintenancePatch,
    ) -> Result<MaintenanceConfig, ConfigEditError> {
        let mut updated = None;
        self.edit(|cfg| {
            patch.check_startup_only(&cfg.maintenance)?;
            patch.apply_to(&mut cfg.maintenance);
            validate_maintenance(&cfg.maintenance)?;
            updated = Some(cfg.maintenance.clone());
            Ok(())
        })
        .await?;
        Ok(updated.unwrap_or_default())
    }

    async fn edit<F>(&self, f: F) -> Result<(), ConfigEditError>
    where
        F: FnOnce(&mut Config) -> Result<(), ConfigEditError>,
    {
        let mut guard = self.inner.write().await;
        let mut next = guard.clone();
        f(&mut next)?;
        next.save_to(&self.path).map_err(ConfigEditError::Save)?;
        *guard = next;
        Ok(())
    }
}
