//! facewatch-core — Face detection and recognition engine.
//!
//! Detects faces with OpenCV's Haar cascade classifier and recognizes them
//! with OpenCV's Local Binary Pattern Histogram recognizer. Callers work in
//! 8-bit grayscale buffers from the `image` crate; conversion to OpenCV
//! matrices stays inside this crate.

pub mod detector;
pub mod mat;
pub mod patch;
pub mod recognizer;
pub mod types;

pub use detector::{CascadeDetector, CascadeError};
pub use patch::{FacePatch, PATCH_SIZE};
pub use recognizer::{LbphParams, LbphRecognizer, Prediction, RecognizerError};
pub use types::{BoundingBox, DetectParams, FaceDetector};
