use facewatch_core::DetectParams;
use facewatch_hw::RetryPolicy;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

/// Where OpenCV packages usually install their cascades.
const CASCADE_DIRS: &[&str] = &[
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/usr/local/share/opencv/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
];

/// Fonts with Arabic coverage, most preferred first.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansArabic-Regular.ttf",
    "/usr/share/fonts/noto/NotoSansArabic-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
];

/// Shared configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the database, photos and uploads (default: data).
    pub data_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Managed reference photos.
    pub photo_dir: PathBuf,
    /// Staging directory for HTTP uploads.
    pub upload_dir: PathBuf,
    /// Static web files served by the daemon.
    pub static_dir: PathBuf,
    /// OpenCV frontal-face Haar cascade XML.
    pub cascade_path: PathBuf,
    /// TrueType font for labels; `None` uses the bitmap fallback.
    pub font_path: Option<PathBuf>,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
    pub scale_factor: f64,
    /// Neighbor count for enrollment and training, kept within 5..=8.
    pub enroll_min_neighbors: u32,
    pub live_min_neighbors: u32,
    /// Smallest face side in pixels.
    pub min_face_size: u32,
    /// LBPH distance below which a prediction counts as a match.
    pub match_threshold: f64,
    /// Label drawn over faces that match no one.
    pub unknown_label: String,
    pub http_addr: String,
    pub viewer_addr: String,
    /// Explicit viewer binary; otherwise looked up next to the daemon.
    pub viewer_bin: Option<PathBuf>,
    pub viewer_autostart: bool,
    pub camera_attempts: u32,
    pub camera_retry_ms: u64,
    /// Consecutive frame read failures tolerated before the loop stops.
    pub frame_failure_budget: u32,
}

impl Config {
    /// Load configuration from `FACEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup (the environment, or a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| get(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        let int = |key: &str| setting::<u32>(&get, key);
        let float = |key: &str| setting::<f64>(&get, key).filter(|v| v.is_finite());

        let data_dir = path("FACEWATCH_DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));

        let cascade_path = path("FACEWATCH_CASCADE_PATH").unwrap_or_else(|| {
            find_existing(CASCADE_DIRS.iter().map(|d| Path::new(d).join(CASCADE_FILE)))
                .unwrap_or_else(|| data_dir.join(CASCADE_FILE))
        });

        let font_path = path("FACEWATCH_FONT_PATH")
            .or_else(|| find_existing(FONT_CANDIDATES.iter().map(PathBuf::from)));

        let enroll_min_neighbors = int("FACEWATCH_ENROLL_MIN_NEIGHBORS").unwrap_or(5).clamp(5, 8);

        Self {
            db_path: path("FACEWATCH_DB_PATH").unwrap_or_else(|| data_dir.join("face_recognition.db")),
            photo_dir: path("FACEWATCH_PHOTO_DIR").unwrap_or_else(|| data_dir.join("photos")),
            upload_dir: path("FACEWATCH_UPLOAD_DIR").unwrap_or_else(|| data_dir.join("uploads")),
            static_dir: path("FACEWATCH_STATIC_DIR").unwrap_or_else(|| PathBuf::from("static")),
            cascade_path,
            font_path,
            camera_device: get("FACEWATCH_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            frame_width: int("FACEWATCH_FRAME_WIDTH").unwrap_or(1280),
            frame_height: int("FACEWATCH_FRAME_HEIGHT").unwrap_or(720),
            fps: int("FACEWATCH_FPS").filter(|v| *v > 0).unwrap_or(30),
            scale_factor: float("FACEWATCH_SCALE_FACTOR").filter(|v| *v > 1.0).unwrap_or(1.1),
            enroll_min_neighbors,
            live_min_neighbors: int("FACEWATCH_LIVE_MIN_NEIGHBORS").unwrap_or(5),
            min_face_size: int("FACEWATCH_MIN_FACE_SIZE").unwrap_or(30),
            match_threshold: float("FACEWATCH_MATCH_THRESHOLD").unwrap_or(100.0),
            unknown_label: get("FACEWATCH_UNKNOWN_LABEL").unwrap_or_else(|| "Unknown".to_string()),
            http_addr: get("FACEWATCH_HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            viewer_addr: get("FACEWATCH_VIEWER_ADDR").unwrap_or_else(|| "127.0.0.1:5001".to_string()),
            viewer_bin: path("FACEWATCH_VIEWER_BIN"),
            viewer_autostart: get("FACEWATCH_VIEWER_AUTOSTART")
                .map(|v| v != "0")
                .unwrap_or(true),
            camera_attempts: int("FACEWATCH_CAMERA_ATTEMPTS").map_or(3, |v| v.max(1)),
            camera_retry_ms: setting::<u64>(&get, "FACEWATCH_CAMERA_RETRY_MS").unwrap_or(1000),
            frame_failure_budget: int("FACEWATCH_FRAME_FAILURE_BUDGET").map_or(10, |v| v.max(1)),
            data_dir,
        }
    }

    /// Detection settings for enrollment and model training.
    pub fn enroll_params(&self) -> DetectParams {
        DetectParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.enroll_min_neighbors,
            min_size: self.min_face_size,
        }
    }

    /// Detection settings for live camera frames.
    pub fn live_params(&self) -> DetectParams {
        DetectParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.live_min_neighbors,
            min_size: self.min_face_size,
        }
    }

    pub fn camera_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.camera_attempts,
            delay: Duration::from_millis(self.camera_retry_ms),
        }
    }
}

/// Parse a numeric setting, warning and falling back to the default when the
/// value is present but malformed.
fn setting<T>(get: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = get(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

fn find_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.is_file())
}
