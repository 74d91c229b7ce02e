//! Haar cascade face detection backed by OpenCV's `CascadeClassifier`.

use crate::mat::gray_to_mat;
use crate::types::{BoundingBox, DetectParams, FaceDetector};
use image::GrayImage;
use opencv::core::{Rect, Size, Vector};
use opencv::objdetect::{self, CascadeClassifier};
use opencv::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("{} is not a usable cascade file", .0.display())]
    Invalid(PathBuf),
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Frontal-face detector over an OpenCV cascade XML file.
pub struct CascadeDetector {
    // detect_multi_scale takes &mut self
    classifier: Mutex<CascadeClassifier>,
    path: PathBuf,
}

impl CascadeDetector {
    /// Load an OpenCV cascade XML file from the given path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CascadeError::NotFound(path.to_path_buf()));
        }
        let name = path
            .to_str()
            .ok_or_else(|| CascadeError::Invalid(path.to_path_buf()))?;

        let classifier = CascadeClassifier::new(name)?;
        if classifier.empty()? {
            return Err(CascadeError::Invalid(path.to_path_buf()));
        }

        tracing::info!(path = %path.display(), "cascade loaded");
        Ok(Self {
            classifier: Mutex::new(classifier),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, gray: &GrayImage, params: &DetectParams) -> opencv::Result<Vec<BoundingBox>> {
        let mat = gray_to_mat(gray)?;
        let min_side = i32::try_from(params.min_size).unwrap_or(i32::MAX);
        let min_neighbors = i32::try_from(params.min_neighbors).unwrap_or(i32::MAX);
        let mut found = Vector::<Rect>::new();

        self.classifier
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .detect_multi_scale(
                &mat,
                &mut found,
                params.scale_factor,
                min_neighbors,
                objdetect::CASCADE_SCALE_IMAGE,
                Size::new(min_side, min_side),
                Size::default(),
            )?;

        let (width, height) = gray.dimensions();
        Ok(found
            .iter()
            .filter_map(to_box)
            .filter_map(|b| b.clamp_to(width, height))
            .collect())
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Vec<BoundingBox> {
        if params.scale_factor <= 1.0 {
            tracing::warn!(scale_factor = params.scale_factor, "scale factor must exceed 1.0");
            return Vec::new();
        }
        if gray.width() == 0 || gray.height() == 0 {
            return Vec::new();
        }

        match self.run(gray, params) {
            Ok(faces) => {
                tracing::debug!(faces = faces.len(), "cascade detection");
                faces
            }
            Err(e) => {
                tracing::warn!(error = %e, "cascade detection failed");
                Vec::new()
            }
        }
    }
}

fn to_box(r: Rect) -> Option<BoundingBox> {
    Some(BoundingBox::new(
        u32::try_from(r.x).ok()?,
        u32::try_from(r.y).ok()?,
        u32::try_from(r.width).ok()?,
        u32::try_from(r.height).ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// A system-installed cascade, if this machine has one.
    fn installed_cascade() -> Option<PathBuf> {
        [
            "/usr/share/opencv4/haarcascades",
            "/usr/share/opencv/haarcascades",
            "/usr/local/share/opencv4/haarcascades",
        ]
        .iter()
        .map(|d| Path::new(d).join("haarcascade_frontalface_default.xml"))
        .find(|p| p.is_file())
    }

    #[test]
    fn test_load_missing_file() {
        let err = CascadeDetector::load("/nonexistent/cascade.xml").err().unwrap();
        assert!(matches!(err, CascadeError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_non_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.xml");
        std::fs::write(&path, "<?xml version=\"1.0\"?>\n<opencv_storage>\n</opencv_storage>\n").unwrap();
        assert!(CascadeDetector::load(&path).is_err());
    }

    #[test]
    fn test_negative_rects_dropped() {
        assert_eq!(to_box(Rect::new(-1, 0, 10, 10)), None);
        assert_eq!(to_box(Rect::new(3, 4, 10, 12)), Some(BoundingBox::new(3, 4, 10, 12)));
    }

    #[test]
    fn test_uniform_image_has_no_faces() {
        let Some(path) = installed_cascade() else {
            return;
        };
        let detector = CascadeDetector::load(&path).unwrap();
        assert_eq!(detector.path(), path.as_path());
        let flat = GrayImage::from_pixel(320, 240, Luma([128]));
        assert!(detector.detect(&flat, &DetectParams::default()).is_empty());
    }

    #[test]
    fn test_invalid_scale_factor() {
        let Some(path) = installed_cascade() else {
            return;
        };
        let detector = CascadeDetector::load(&path).unwrap();
        let params = DetectParams {
            scale_factor: 1.0,
            ..DetectParams::default()
        };
        assert!(detector.detect(&GrayImage::new(100, 100), &params).is_empty());
    }
}
