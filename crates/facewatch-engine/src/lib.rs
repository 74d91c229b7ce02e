//! facewatch-engine — The pieces shared by the daemon, the viewer and the CLI.
//!
//! Enrollment writes a person and retrains; the model manager owns the
//! current trained snapshot; the annotation loop pumps camera frames through
//! detection and classification and draws labelled boxes on them.

pub mod annotate;
pub mod config;
pub mod enroll;
pub mod model;
pub mod overlay;
pub mod shaping;

pub use annotate::{annotate_frame, AnnotationLoop, FrameSink, FrameSource, LoopSettings, LoopStatus};
pub use config::Config;
pub use enroll::{EnrollError, EnrollOutcome, Enroller};
pub use model::{Classification, Identity, ModelManager, RebuildSummary, RecognitionModel};
pub use overlay::{LabelRenderer, RenderError};

/// Synthetic fixtures for tests in this and dependent crates.
#[cfg(any(test, feature = "testing"))]
pub mod testing;
