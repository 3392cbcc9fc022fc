//! Management HTTP API over the shared [`ConfigStore`].

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use appkeeper_core::config::{ConfigEditError, ConfigStore, MaintenanceConfig, MaintenancePatch};
use appkeeper_core::model::AppSpec;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    /// Wakes the scheduler for an immediate cycle.
    pub trigger: Arc<Notify>,
}

impl AppState {
    pub fn new(store: Arc<ConfigStore>, trigger: Arc<Notify>) -> Self {
        Self { store, trigger }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/config/maintenance",
            get(get_maintenance).post(update_maintenance),
        )
        .route("/config/apps", get(list_apps).put(add_app))
        .route("/config/apps/{id}", delete(remove_app))
        .route("/maintenance/run", post(run_now))
        .route("/maintenance/installed-apps", delete(clear_installed))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `{ "error": "..." }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ConfigEditError> for ApiError {
    fn from(e: ConfigEditError) -> Self {
        let status = match &e {
            ConfigEditError::Invalid(_) => StatusCode::BAD_REQUEST,
            ConfigEditError::NotFound(_) => StatusCode::NOT_FOUND,
            ConfigEditError::Save(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("config edit failed: {e}");
        }
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, e.body_text())
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn get_maintenance(State(state): State<AppState>) -> Json<MaintenanceConfig> {
    Json(state.store.snapshot().await.maintenance)
}

async fn update_maintenance(
    State(state): State<AppState>,
    patch: Result<Json<MaintenancePatch>, JsonRejection>,
) -> Result<Json<MaintenanceConfig>, ApiError> {
    let Json(patch) = patch?;
    let updated = state.store.update_maintenance(patch).await?;
    info!("maintenance settings updated");
    Ok(Json(updated))
}

async fn list_apps(State(state): State<AppState>) -> Json<Vec<AppSpec>> {
    Json(state.store.snapshot().await.apps)
}

async fn add_app(
    State(state): State<AppState>,
    app: Result<Json<AppSpec>, JsonRejection>,
) -> Result<(StatusCode, Json<AppSpec>), ApiError> {
    let Json(app) = app?;
    state.store.add_app(app.clone()).await?;
    info!(app = %app.id, repo = %app.repo, "app declared");
    Ok((StatusCode::CREATED, Json(app)))
}

async fn remove_app(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<AppSpec>, ApiError> {
    let removed = state.store.remove_app(&id).await?;
    info!(app = %id, "app removed from config");
    Ok(Json(removed))
}

async fn run_now(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    state.trigger.notify_one();
    (StatusCode::ACCEPTED, Json(json!({ "queued": true })))
}

/// Wipes every app directory so the next cycle installs from scratch.
async fn clear_installed(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let root = state.store.apps_root().await;
    let removed = clear_dir(&root)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {e}", root.display())))?;
    info!(root = %root.display(), removed, "installed apps cleared");
    Ok(Json(json!({ "removed": removed })))
}

async fn clear_dir(root: &Path) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await?;
        } else {
            tokio::fs::remove_file(entry.path()).await?;
        }
        removed += 1;
    }
    Ok(removed)
}
