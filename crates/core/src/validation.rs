use std::collections::HashSet;

use thiserror::Error;

use crate::config::{Config, MaintenanceConfig};
use crate::model::AppSpec;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("app id cannot be empty")]
    EmptyAppId,
    #[error("app id '{0}' may only contain letters, digits, '.', '_' and '-'")]
    InvalidAppId(String),
    #[error("app id '{0}' not unique")]
    DuplicateAppId(String),
    #[error("app '{app}' is missing repo.{field}")]
    MissingRepoField { app: String, field: &'static str },
    #[error("maintenance.period_ms must be greater than zero")]
    ZeroPeriod,
    #[error("maintenance.dependency_command cannot be empty")]
    EmptyDependencyCommand,
    #[error("maintenance.process_prefix cannot be empty")]
    EmptyProcessPrefix,
    #[error("maintenance.{0} can only be changed in the config file while the daemon is stopped")]
    StartupOnly(&'static str),
}

pub fn validate_config(config: &Config) -> Result<(), ValidationError> {
    validate_maintenance(&config.maintenance)?;
    validate_apps(&config.apps)
}

pub fn validate_maintenance(m: &MaintenanceConfig) -> Result<(), ValidationError> {
    if m.period_ms == 0 {
        return Err(ValidationError::ZeroPeriod);
    }
    if m.dependency_command.first().map_or(true, |p| p.trim().is_empty()) {
        return Err(ValidationError::EmptyDependencyCommand);
    }
    if m.process_prefix.is_empty() {
        return Err(ValidationError::EmptyProcessPrefix);
    }
    Ok(())
}

pub fn validate_apps(apps: &[AppSpec]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for app in apps {
        validate_app(app)?;
        if !seen.insert(app.id.as_str()) {
            return Err(ValidationError::DuplicateAppId(app.id.clone()));
        }
    }
    Ok(())
}

pub fn validate_app_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyAppId);
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if id == "." || id == ".." || !id.chars().all(allowed) {
        return Err(ValidationError::InvalidAppId(id.to_string()));
    }
    Ok(())
}

/// The id ends up as a directory name and a process name, so it must be a
/// single safe path component.
pub fn validate_app(app: &AppSpec) -> Result<(), ValidationError> {
    let id = app.id.as_str();
    validate_app_id(id)?;
    if app.repo.owner.trim().is_empty() {
        return Err(ValidationError::MissingRepoField {
            app: id.to_string(),
            field: "owner",
        });
    }
    if app.repo.name.trim().is_empty() {
        return Err(ValidationError::MissingRepoField {
            app: id.to_string(),
            field: "name",
        });
    }
    Ok(())
}
