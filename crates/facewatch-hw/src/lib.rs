//! facewatch-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access producing RGB frames, plus the bounded
//! retry helpers used to acquire a camera and tolerate transient read errors.

pub mod camera;
pub mod frame;
pub mod retry;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use retry::{FailureBudget, RetryError, RetryPolicy};
