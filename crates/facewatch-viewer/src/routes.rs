//! Viewer web surface: the page, the MJPEG stream and loop control.

use crate::stream::{mjpeg_stream, MjpegBroadcaster, BOUNDARY};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use facewatch_engine::{AnnotationLoop, FrameSink, FrameSource, LoopStatus, ModelManager};
use facewatch_hw::CameraError;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Opens the frame source on the pump thread; receives the attempt number.
pub type SourceOpener = dyn Fn(u32) -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync;

#[derive(Clone)]
pub struct AppState {
    pub annotation: Arc<AnnotationLoop>,
    pub broadcaster: Arc<MjpegBroadcaster>,
    pub models: Arc<ModelManager>,
    pub open_source: Arc<SourceOpener>,
}

impl AppState {
    /// Start the loop on a fresh source. `false` if it was already running or
    /// the previous run has not released its camera yet.
    pub fn start(&self) -> bool {
        let open = Arc::clone(&self.open_source);
        let sink: Arc<dyn FrameSink> = self.broadcaster.clone();
        self.annotation.start(move |attempt| open(attempt), sink)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/stream", get(stream))
        .route("/status", get(status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>facewatch live</title>
<style>
  body { font-family: sans-serif; background: #111; color: #eee; margin: 1rem; }
  img { max-width: 100%; border: 1px solid #333; background: #000; }
  button { margin-right: .5rem; }
</style>
</head>
<body>
<h1>Face recognition</h1>
<p>
  <button onclick="post('/start')">Start</button>
  <button onclick="post('/stop')">Stop</button>
  <button onclick="post('/reload')">Reload faces</button>
  <span id="status">…</span>
</p>
<img id="feed" src="/stream" alt="live feed">
<script>
async function refresh() {
  try {
    const s = await (await fetch('/status')).json();
    document.getElementById('status').textContent =
      s.state + (s.frames !== undefined ? ' (' + s.frames + ' frames)' : '') + (s.reason ? ': ' + s.reason : '');
  } catch (e) {
    document.getElementById('status').textContent = 'viewer offline';
  }
}
async function post(path) {
  await fetch(path, { method: 'POST' });
  if (path === '/start') document.getElementById('feed').src = '/stream?' + Date.now();
  refresh();
}
setInterval(refresh, 1000);
refresh();
</script>
</body>
</html>
"#;

/// `GET /`
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /stream`
async fn stream(State(state): State<AppState>) -> Response {
    let body = Body::from_stream(mjpeg_stream(state.broadcaster.subscribe()));
    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

/// `GET /status`
async fn status(State(state): State<AppState>) -> Json<LoopStatus> {
    Json(state.annotation.status())
}

/// `POST /start`, retraining first so faces enrolled since launch are known.
async fn start(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if !state.annotation.is_running() {
        rebuild(&state).await?;
    }
    let started = state.start();
    Ok(Json(json!({ "started": started, "status": state.annotation.status() })))
}

/// `POST /stop`
async fn stop(State(state): State<AppState>) -> Result<Json<LoopStatus>, (StatusCode, Json<Value>)> {
    let annotation = Arc::clone(&state.annotation);
    tokio::task::spawn_blocking(move || annotation.stop())
        .await
        .map(Json)
        .map_err(|e| internal(format!("stop task failed: {e}")))
}

/// `POST /reload`: retrain from the store without touching the camera.
async fn reload(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let summary = rebuild(&state).await?;
    Ok(Json(json!({ "trained": summary.trained, "skipped": summary.skipped })))
}

async fn rebuild(state: &AppState) -> Result<facewatch_engine::RebuildSummary, (StatusCode, Json<Value>)> {
    let models = Arc::clone(&state.models);
    match tokio::task::spawn_blocking(move || models.rebuild()).await {
        Ok(Ok(summary)) => Ok(summary),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "model rebuild failed");
            Err(internal(e.to_string()))
        }
        Err(e) => Err(internal(format!("rebuild task failed: {e}"))),
    }
}

fn internal(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": message })),
    )
}
