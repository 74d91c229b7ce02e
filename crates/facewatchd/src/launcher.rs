//! Starts the live viewer as a separate process after an enrollment, or
//! tells the one already running to retrain.

use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

const VIEWER_BIN: &str = "facewatch-viewer";

/// Retraining reads every stored photo, so allow it some time.
const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched { pid: u32 },
    AlreadyRunning { pid: u32 },
}

/// Tracks at most one viewer child.
pub struct ViewerLauncher {
    binary: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ViewerLauncher {
    /// Use `configured` if given, else a viewer next to this executable, else `PATH`.
    pub fn new(configured: Option<PathBuf>) -> Self {
        let binary = configured.unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join(VIEWER_BIN)))
                .filter(|candidate| candidate.is_file())
                .unwrap_or_else(|| PathBuf::from(VIEWER_BIN))
        });
        Self {
            binary,
            child: Mutex::new(None),
        }
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    /// Spawn the viewer unless the previously launched one is still alive.
    /// The child inherits this process's environment.
    pub fn launch(&self) -> std::io::Result<LaunchOutcome> {
        let mut child = self.child.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(running) = child.as_mut() {
            if running.try_wait()?.is_none() {
                let pid = running.id();
                tracing::info!(pid, "viewer already running; not launching another");
                return Ok(LaunchOutcome::AlreadyRunning { pid });
            }
        }

        let spawned = Command::new(&self.binary).stdin(Stdio::null()).spawn()?;
        let pid = spawned.id();
        tracing::info!(pid, binary = %self.binary.display(), "viewer launched");
        *child = Some(spawned);
        Ok(LaunchOutcome::Launched { pid })
    }

    pub fn is_running(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|p| p.into_inner());
        match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// What the viewer reports after retraining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReloadSummary {
    pub trained: usize,
    pub skipped: usize,
}

/// Client for a running viewer's `POST /reload`.
pub struct ViewerReloader {
    client: reqwest::Client,
    url: String,
}

impl ViewerReloader {
    /// Target the viewer listening on `viewer_addr`. Wildcard listen
    /// addresses are reached through loopback.
    pub fn new(viewer_addr: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RELOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to a default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            url: format!("http://{}/reload", loopback_for(viewer_addr)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the viewer to retrain from the store.
    pub async fn reload(&self) -> Result<ReloadSummary, reqwest::Error> {
        self.client
            .post(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

fn loopback_for(addr: &str) -> String {
    match addr.rsplit_once(':') {
        Some(("0.0.0.0", port)) => format!("127.0.0.1:{port}"),
        Some(("[::]", port)) => format!("[::1]:{port}"),
        _ => addr.to_string(),
    }
}
