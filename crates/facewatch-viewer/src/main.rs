use anyhow::{Context, Result};
use clap::Parser;
use facewatch_core::{CascadeDetector, FaceDetector};
use facewatch_engine::{AnnotationLoop, Config, FrameSource, LabelRenderer, LoopSettings, ModelManager};
use facewatch_hw::{Camera, CameraError};
use facewatch_store::PersonStore;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

mod routes;
mod stream;

#[derive(Parser)]
#[command(name = "facewatch-viewer", version, about = "facewatch live camera viewer")]
struct Cli {
    /// V4L2 device (overrides FACEWATCH_CAMERA_DEVICE)
    #[arg(short, long)]
    device: Option<String>,
    /// Listen address (overrides FACEWATCH_VIEWER_ADDR)
    #[arg(long)]
    addr: Option<String>,
    /// Wait for POST /start instead of opening the camera at launch
    #[arg(long)]
    no_autostart: bool,
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
    if let Some(device) = cli.device {
        config.camera_device = device;
    }
    if let Some(addr) = cli.addr {
        config.viewer_addr = addr;
    }
    if cli.no_autostart {
        config.viewer_autostart = false;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facewatch-viewer starting");

    let store = PersonStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
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

    let renderer = Arc::new(LabelRenderer::from_config(config.font_path.as_deref()));
    let annotation = Arc::new(AnnotationLoop::new(
        Arc::clone(&models),
        renderer,
        LoopSettings::from_config(&config),
    ));

    let (device, width, height, fps) = (
        config.camera_device.clone(),
        config.frame_width,
        config.frame_height,
        config.fps,
    );
    let open_source: Arc<routes::SourceOpener> = Arc::new(move |attempt: u32| -> Result<Box<dyn FrameSource>, CameraError> {
        tracing::info!(device = %device, attempt, "opening camera");
        let camera = Camera::open(&device, width, height, fps)?;
        tracing::info!(
            device = %device,
            width = camera.width,
            height = camera.height,
            format = ?camera.pixel_format(),
            "camera opened"
        );
        Ok(Box::new(camera))
    });

    let state = routes::AppState {
        annotation: Arc::clone(&annotation),
        broadcaster: Arc::new(stream::MjpegBroadcaster::new(stream::JPEG_QUALITY)),
        models: Arc::clone(&models),
        open_source,
    };

    if config.viewer_autostart {
        let models = Arc::clone(&models);
        let summary = tokio::task::spawn_blocking(move || models.rebuild())
            .await
            .context("initial training task failed")?
            .context("failed to read people for training")?;
        tracing::info!(trained = summary.trained, skipped = summary.skipped, "model ready");
        state.start();
    }

    let listener = TcpListener::bind(&config.viewer_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.viewer_addr))?;
    tracing::info!(addr = %config.viewer_addr, "facewatch-viewer ready");

    // MJPEG clients never finish their response, so don't wait on them at shutdown
    let server = axum::serve(listener, routes::router(state)).into_future();
    tokio::select! {
        result = server => result.context("server error")?,
        signal = tokio::signal::ctrl_c() => signal.context("failed to listen for ctrl-c")?,
    }

    tracing::info!("facewatch-viewer shutting down");
    let final_status = tokio::task::spawn_blocking(move || annotation.stop())
        .await
        .context("stop task failed")?;
    tracing::info!(status = ?final_status, "camera released");
    Ok(())
}
