//! HTTP bridge: photo submissions from the web form, plus the people registry.
//!
//! | Method   | Path                 | Notes |
//! |----------|----------------------|-------|
//! | `POST`   | `/api/submit-report` | `{"name": .., "photo": <base64>}` |
//! | `GET`    | `/api/people`        | newest first |
//! | `GET`    | `/api/people/{id}`   | 404 if not found |
//! | `DELETE` | `/api/people/{id}`   | 204, retrains |
//! | `GET`    | `/api/status`        | |
//!
//! Anything else is served from the static directory.

use crate::launcher::{LaunchOutcome, ViewerLauncher, ViewerReloader};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::{DateTime, Local};
use facewatch_engine::{EnrollError, Enroller};
use facewatch_store::Person;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Photos arrive base64-encoded inside JSON, so allow well past axum's 2 MB default.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

const DEFAULT_NAME: &str = "Unknown";

#[derive(Clone)]
pub struct AppState {
    pub enroller: Arc<Enroller>,
    pub upload_dir: PathBuf,
    pub launcher: Arc<ViewerLauncher>,
    pub reloader: Arc<ViewerReloader>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

impl From<facewatch_store::Error> for ApiError {
    fn from(e: facewatch_store::Error) -> Self {
        tracing::error!(error = %e, "store failure");
        ApiError::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<EnrollError> for ApiError {
    fn from(e: EnrollError) -> Self {
        if e.is_rejection() {
            ApiError::BadRequest(e.to_string())
        } else {
            tracing::error!(error = %e, "enrollment failure");
            ApiError::Internal(e.to_string())
        }
    }
}

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/api/submit-report", post(submit_report))
        .route("/api/people", get(list_people))
        .route("/api/people/{id}", get(get_person).delete(delete_person))
        .route("/api/status", get(status))
        .fallback_service(ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Submit ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SubmitReport {
    pub name: Option<String>,
    pub photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
    pub name: String,
    pub person_id: i64,
}

/// `POST /api/submit-report`
async fn submit_report(
    State(state): State<AppState>,
    payload: Result<Json<SubmitReport>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(body) = payload?;
    let name = body
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_NAME.to_string());
    let bytes = decode_photo(body.photo.as_deref().unwrap_or_default())?;

    let staged = stage_upload(&state.upload_dir, &name, &bytes, Local::now())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, dir = %state.upload_dir.display(), "could not stage upload");
            ApiError::Internal(format!("could not save the upload: {e}"))
        })?;
    tracing::info!(name = %name, staged = %staged.display(), bytes = bytes.len(), "photo received");

    let enroller = Arc::clone(&state.enroller);
    let (task_name, task_path) = (name.clone(), staged.clone());
    let result = tokio::task::spawn_blocking(move || enroller.try_enroll(&task_name, &task_path)).await;

    if let Err(e) = tokio::fs::remove_file(&staged).await {
        tracing::warn!(error = %e, staged = %staged.display(), "could not remove staged upload");
    }

    let person_id = match result {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => {
            if e.is_rejection() {
                tracing::info!(name = %name, reason = %e, "enrollment rejected");
            }
            return Err(e.into());
        }
        Err(e) => {
            tracing::error!(error = %e, "enrollment task failed");
            return Err(ApiError::Internal(format!("enrollment task failed: {e}")));
        }
    };

    match state.launcher.launch() {
        Ok(LaunchOutcome::Launched { pid }) => tracing::debug!(pid, "viewer started after enrollment"),
        Ok(LaunchOutcome::AlreadyRunning { pid }) => match state.reloader.reload().await {
            Ok(summary) => tracing::info!(
                pid,
                trained = summary.trained,
                skipped = summary.skipped,
                "running viewer retrained"
            ),
            Err(e) => tracing::warn!(
                pid,
                error = %e,
                url = state.reloader.url(),
                "could not ask the running viewer to retrain"
            ),
        },
        Err(e) => {
            tracing::warn!(error = %e, binary = %state.launcher.binary().display(), "could not launch viewer")
        }
    }

    Ok(Json(SubmitResponse {
        success: true,
        message: format!("{name} was added successfully"),
        name,
        person_id,
    }))
}

/// Decode a base64 photo, accepting an optional `data:<mime>;base64,` prefix.
fn decode_photo(photo: &str) -> Result<Vec<u8>, ApiError> {
    let data = match photo.trim().split_once(',') {
        Some((head, rest)) if head.starts_with("data:") => rest,
        _ => photo,
    };
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(ApiError::BadRequest("no photo provided".into()));
    }
    let bytes = B64
        .decode(cleaned)
        .map_err(|e| ApiError::BadRequest(format!("photo is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("no photo provided".into()));
    }
    Ok(bytes)
}

/// Filename-safe form of a person's name, `upload` if nothing survives.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Write the upload as `<name>_<YYYYmmdd_HHMMSS>.jpg`, suffixing a counter
/// when two uploads for the same name land in the same second.
async fn stage_upload(
    dir: &Path,
    name: &str,
    bytes: &[u8],
    now: DateTime<Local>,
) -> std::io::Result<PathBuf> {
    use tokio::io::AsyncWriteExt;

    tokio::fs::create_dir_all(dir).await?;
    let stem = format!("{}_{}", sanitize(name), now.format("%Y%m%d_%H%M%S"));

    let mut n = 0u32;
    loop {
        let file_name = if n == 0 {
            format!("{stem}.jpg")
        } else {
            format!("{stem}_{n}.jpg")
        };
        let path = dir.join(file_name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(bytes).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && n < 100 => n += 1,
            Err(e) => return Err(e),
        }
    }
}

// ─── People ──────────────────────────────────────────────────────────────────

/// Run store work on the blocking pool; the SQLite connection sits behind a
/// synchronous mutex.
async fn blocking<T, F>(task: &'static str, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(task, error = %e, "blocking task failed");
        ApiError::Internal(format!("{task} task failed: {e}"))
    })?
}

/// `GET /api/people`
async fn list_people(State(state): State<AppState>) -> Result<Json<Vec<Person>>, ApiError> {
    let enroller = Arc::clone(&state.enroller);
    let people = blocking("list", move || Ok(enroller.models().store().all_people()?)).await?;
    Ok(Json(people))
}

/// `GET /api/people/{id}`
async fn get_person(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<i64>,
) -> Result<Json<Person>, ApiError> {
    let enroller = Arc::clone(&state.enroller);
    blocking("lookup", move || Ok(enroller.models().store().person(id)?))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no person with id {id}")))
}

/// `DELETE /api/people/{id}`, retraining before it answers.
async fn delete_person(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<i64>,
) -> Result<StatusCode, ApiError> {
    let enroller = Arc::clone(&state.enroller);
    let removed = blocking("delete", move || Ok(enroller.remove(id)?)).await?;

    if removed {
        tracing::info!(id, "person deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("no person with id {id}")))
    }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub people: usize,
    pub trained: Vec<i64>,
    pub viewer_running: bool,
}

/// `GET /api/status`
async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let enroller = Arc::clone(&state.enroller);
    let people = blocking("status", move || Ok(enroller.models().store().count()?)).await?;
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        people,
        trained: state.enroller.models().trained_ids(),
        viewer_running: state.launcher.is_running(),
    }))
}
