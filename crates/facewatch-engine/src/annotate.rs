//! Live annotation loop: camera frames in, labelled frames out.
//!
//! One dedicated thread owns the camera for the whole run. It acquires the
//! device with bounded retries, then reads, detects, classifies, draws and
//! publishes until asked to stop or until reads keep failing.

use crate::config::Config;
use crate::model::{Classification, ModelManager};
use crate::overlay::LabelRenderer;
use facewatch_core::{BoundingBox, DetectParams, FacePatch};
use facewatch_hw::{Camera, CameraError, FailureBudget, Frame, RetryError, RetryPolicy};
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long `stop` waits for the pump thread before detaching it.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(10);

/// Anything that can hand out RGB frames one at a time.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        Camera::read_frame(self)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).read_frame()
    }
}

/// Receives annotated frames and status changes from the pump thread.
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: &RgbImage);

    fn status_changed(&self, _status: &LoopStatus) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopStatus {
    Idle,
    Starting,
    Running { frames: u64 },
    Stopped,
    Failed { reason: String },
}

/// Timing, retry and detection settings for one loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub retry: RetryPolicy,
    pub failure_budget: u32,
    /// Pause after each delivered frame.
    pub frame_interval: Duration,
    /// Pause after each failed read.
    pub failure_pause: Duration,
    pub params: DetectParams,
    pub unknown_label: String,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.camera_retry(),
            failure_budget: config.frame_failure_budget,
            frame_interval: Duration::from_millis(30),
            failure_pause: Duration::from_millis(100),
            params: config.live_params(),
            unknown_label: config.unknown_label.clone(),
        }
    }
}

pub struct AnnotationLoop {
    models: Arc<ModelManager>,
    renderer: Arc<LabelRenderer>,
    settings: LoopSettings,
    status: Arc<Mutex<SharedStatus>>,
    worker: Mutex<Option<Run>>,
}

/// Status tagged with the run that last wrote it.
struct SharedStatus {
    generation: u64,
    status: LoopStatus,
}

/// One pump thread and the flag only it watches.
struct Run {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AnnotationLoop {
    pub fn new(models: Arc<ModelManager>, renderer: Arc<LabelRenderer>, settings: LoopSettings) -> Self {
        Self {
            models,
            renderer,
            settings,
            status: Arc::new(Mutex::new(SharedStatus {
                generation: 0,
                status: LoopStatus::Idle,
            })),
            worker: Mutex::new(None),
        }
    }

    /// Start pumping frames from whatever `open` returns. Returns `false`
    /// (and does nothing) if the loop is already running, or if a pump that
    /// was asked to stop has not yet let go of its camera.
    ///
    /// `open` runs on the pump thread and receives the 1-based attempt number.
    pub fn start<S, O>(&self, open: O, sink: Arc<dyn FrameSink>) -> bool
    where
        S: FrameSource + 'static,
        O: FnMut(u32) -> Result<S, CameraError> + Send + 'static,
    {
        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.as_ref() {
            if previous.running.load(Ordering::SeqCst) {
                tracing::info!("annotation loop already running");
                return false;
            }
            if !previous.handle.is_finished() {
                tracing::warn!("previous pump is still releasing the camera");
                return false;
            }
        }
        if let Some(previous) = worker.take() {
            if previous.handle.join().is_err() {
                tracing::error!("pump thread panicked");
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let generation = {
            let mut shared = lock(&self.status);
            shared.generation += 1;
            shared.generation
        };

        let pump = Pump {
            models: Arc::clone(&self.models),
            renderer: Arc::clone(&self.renderer),
            settings: self.settings.clone(),
            running: Arc::clone(&running),
            generation,
            status: Arc::clone(&self.status),
            sink,
        };
        pump.set(LoopStatus::Starting);

        let spawned = std::thread::Builder::new()
            .name("facewatch-pump".into())
            .spawn(move || pump.run(open));

        match spawned {
            Ok(handle) => {
                *worker = Some(Run { running, handle });
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn pump thread");
                lock(&self.status).status = LoopStatus::Failed {
                    reason: format!("could not start pump thread: {e}"),
                };
                false
            }
        }
    }

    /// Ask the loop to stop and wait up to two seconds for it. A failed loop
    /// keeps reporting its failure.
    ///
    /// A pump that outlives the wait keeps its slot, so `start` refuses to
    /// open a second camera until it has exited.
    pub fn stop(&self) -> LoopStatus {
        {
            let mut worker = lock(&self.worker);
            if let Some(run) = worker.as_ref() {
                run.running.store(false, Ordering::SeqCst);
                let deadline = Instant::now() + STOP_TIMEOUT;
                while !run.handle.is_finished() && Instant::now() < deadline {
                    std::thread::sleep(STOP_POLL);
                }
                if run.handle.is_finished() {
                    if let Some(run) = worker.take() {
                        if run.handle.join().is_err() {
                            tracing::error!("pump thread panicked");
                        }
                    }
                } else {
                    tracing::warn!(timeout = ?STOP_TIMEOUT, "pump thread still busy; leaving it to exit on its own");
                }
            }
        }

        let mut shared = lock(&self.status);
        if !matches!(shared.status, LoopStatus::Failed { .. } | LoopStatus::Idle) {
            shared.status = LoopStatus::Stopped;
        }
        tracing::info!(status = ?shared.status, "annotation loop stopped");
        shared.status.clone()
    }

    pub fn status(&self) -> LoopStatus {
        lock(&self.status).status.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|run| run.running.load(Ordering::SeqCst))
    }
}

impl Drop for AnnotationLoop {
    fn drop(&mut self) {
        if let Some(run) = lock(&self.worker).as_ref() {
            run.running.store(false, Ordering::SeqCst);
        }
    }
}

/// Everything the pump thread owns.
struct Pump {
    models: Arc<ModelManager>,
    renderer: Arc<LabelRenderer>,
    settings: LoopSettings,
    running: Arc<AtomicBool>,
    generation: u64,
    status: Arc<Mutex<SharedStatus>>,
    sink: Arc<dyn FrameSink>,
}

impl Pump {
    /// Record a status change unless a newer run has taken over.
    fn set(&self, status: LoopStatus) {
        {
            let mut shared = lock(&self.status);
            if shared.generation != self.generation {
                return;
            }
            shared.status = status.clone();
        }
        self.sink.status_changed(&status);
    }

    fn fail(&self, reason: String) {
        tracing::error!(%reason, "annotation loop failed");
        self.running.store(false, Ordering::SeqCst);
        self.set(LoopStatus::Failed { reason });
    }

    fn run<S, O>(self, open: O)
    where
        S: FrameSource,
        O: FnMut(u32) -> Result<S, CameraError>,
    {
        let acquired = self.settings.retry.acquire(
            open,
            |source: &mut S| source.read_frame().map(|_| ()),
            || self.running.load(Ordering::SeqCst),
        );

        let mut source = match acquired {
            Ok(source) => source,
            Err(RetryError::Cancelled) => {
                self.set(LoopStatus::Stopped);
                return;
            }
            Err(e) => {
                self.fail(format!("camera unavailable: {e}"));
                return;
            }
        };

        if !self.running.load(Ordering::SeqCst) {
            self.set(LoopStatus::Stopped);
            return;
        }

        tracing::info!("annotation loop running");
        self.set(LoopStatus::Running { frames: 0 });

        let mut budget = FailureBudget::new(self.settings.failure_budget);
        let mut frames = 0u64;

        while self.running.load(Ordering::SeqCst) {
            match source.read_frame() {
                Ok(frame) => {
                    budget.record_success();
                    let mut image = frame.image;
                    annotate_frame(
                        &mut image,
                        &self.models,
                        &self.renderer,
                        &self.settings.params,
                        &self.settings.unknown_label,
                    );
                    self.sink.publish(&image);
                    frames += 1;
                    let mut shared = lock(&self.status);
                    if shared.generation == self.generation {
                        shared.status = LoopStatus::Running { frames };
                    }
                    drop(shared);
                    std::thread::sleep(self.settings.frame_interval);
                }
                Err(e) => {
                    tracing::warn!(error = %e, consecutive = budget.consecutive() + 1, "frame read failed");
                    if budget.record_failure() {
                        self.fail(format!(
                            "camera stopped delivering frames after {} consecutive failures: {e}",
                            budget.limit()
                        ));
                        return;
                    }
                    std::thread::sleep(self.settings.failure_pause);
                }
            }
        }

        self.set(LoopStatus::Stopped);
        // `source` drops here, releasing the camera
    }
}

/// Detect, classify and label every face in `image`, returning what was drawn.
pub fn annotate_frame(
    image: &mut RgbImage,
    models: &ModelManager,
    renderer: &LabelRenderer,
    params: &DetectParams,
    unknown_label: &str,
) -> Vec<(BoundingBox, Classification)> {
    let gray = image::imageops::grayscale(image);
    let model = models.snapshot();
    let faces = models.detector().detect(&gray, params);

    let mut results = Vec::with_capacity(faces.len());
    for face in faces {
        let Some(patch) = FacePatch::extract(&gray, &face) else {
            continue;
        };
        let classification = model.classify(&patch);
        renderer.draw_face(image, &face, classification.label(unknown_label), classification.is_known());
        results.push((face, classification));
    }
    results
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}
