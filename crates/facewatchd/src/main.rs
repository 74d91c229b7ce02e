use anyhow::{Context, Result};
use clap::Parser;
use facewatch_core::{CascadeDetector, FaceDetector};
use facewatch_engine::{Config, Enroller, ModelManager};
use facewatch_store::PersonStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

mod http;
mod launcher;

#[derive(Parser)]
#[command(name = "facewatchd", version, about = "facewatch HTTP bridge")]
struct Cli {
    /// Listen address (overrides FACEWATCH_HTTP_ADDR)
    #[arg(long)]
    addr: Option<String>,
    /// Directory of static web files (overrides FACEWATCH_STATIC_DIR)
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(addr) = cli.addr {
        config.http_addr = addr;
    }
    if let Some(dir) = cli.static_dir {
        config.static_dir = dir;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facewatchd starting");

    let store = PersonStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "person store opened");

    let detector: Arc<dyn FaceDetector> = Arc::new(
        CascadeDetector::load(&config.cascade_path)
            .with_context(|| format!("failed to load cascade {}", config.cascade_path.display()))?,
    );

    let models = Arc::new(ModelManager::new(
        Arc::new(store),
        detector,
        config.enroll_params(),
        config.match_threshold,
    ));
    let summary = {
        let models = Arc::clone(&models);
        tokio::task::spawn_blocking(move || models.rebuild())
            .await
            .context("initial training task failed")?
            .context("failed to read people for training")?
    };
    tracing::info!(trained = summary.trained, skipped = summary.skipped, "initial model ready");

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("failed to create {}", config.upload_dir.display()))?;

    let state = http::AppState {
        enroller: Arc::new(Enroller::new(models, &config.photo_dir)),
        upload_dir: config.upload_dir.clone(),
        launcher: Arc::new(launcher::ViewerLauncher::new(config.viewer_bin.clone())),
        reloader: Arc::new(launcher::ViewerReloader::new(&config.viewer_addr)),
    };
    let app = http::router(state, &config.static_dir);

    let listener = TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, static_dir = %config.static_dir.display(), "facewatchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("facewatchd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
