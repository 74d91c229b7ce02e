//! Local Binary Pattern Histogram (LBPH) face recognizer.
//!
//! Wraps OpenCV's `face::LBPHFaceRecognizer`. Prediction is the nearest
//! training sample under OpenCV's chi-square histogram distance; lower
//! distance means a closer match. Person ids stay `i64` on this side and are
//! mapped to OpenCV's `i32` labels by training position.

use crate::mat::gray_to_mat;
use crate::patch::FacePatch;
use opencv::core::{Mat, Ptr, Vector};
use opencv::face::LBPHFaceRecognizer;
use opencv::prelude::*;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("cannot train on an empty sample set")]
    EmptyTrainingSet,
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
    #[error("recognizer returned label {0}, which was never trained")]
    UnknownLabel(i32),
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    fn validate(&self) -> Result<(i32, i32, i32, i32), RecognizerError> {
        if self.radius == 0 {
            return Err(RecognizerError::InvalidParams("radius must be at least 1".into()));
        }
        if !(1..=16).contains(&self.neighbors) {
            return Err(RecognizerError::InvalidParams(format!(
                "neighbors must be in 1..=16, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(RecognizerError::InvalidParams("grid must be at least 1x1".into()));
        }
        let int = |v: u32| {
            i32::try_from(v).map_err(|_| RecognizerError::InvalidParams(format!("{v} is out of range")))
        };
        Ok((int(self.radius)?, int(self.neighbors)?, int(self.grid_x)?, int(self.grid_y)?))
    }
}

/// Nearest training sample for a query patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: i64,
    pub distance: f64,
}

pub struct LbphRecognizer {
    params: LbphParams,
    /// Person id for each OpenCV label, indexed by label.
    labels: Vec<i64>,
    model: Mutex<Ptr<LBPHFaceRecognizer>>,
}

impl LbphRecognizer {
    /// Build a recognizer from labelled face patches.
    pub fn train<'a>(
        params: LbphParams,
        samples: impl IntoIterator<Item = (i64, &'a FacePatch)>,
    ) -> Result<Self, RecognizerError> {
        let (radius, neighbors, grid_x, grid_y) = params.validate()?;

        let mut labels = Vec::new();
        let mut images = Vector::<Mat>::new();
        let mut indices = Vector::<i32>::new();
        for (label, patch) in samples {
            let index = i32::try_from(labels.len())
                .map_err(|_| RecognizerError::InvalidParams("too many training samples".into()))?;
            images.push(gray_to_mat(patch.as_image())?);
            indices.push(index);
            labels.push(label);
        }

        if labels.is_empty() {
            return Err(RecognizerError::EmptyTrainingSet);
        }

        // no threshold inside OpenCV; callers apply their own
        let mut model = LBPHFaceRecognizer::create(radius, neighbors, grid_x, grid_y, f64::MAX)?;
        model.train(&images, &indices)?;

        tracing::debug!(samples = labels.len(), "trained LBPH recognizer");
        Ok(Self {
            params,
            labels,
            model: Mutex::new(model),
        })
    }

    /// Person id and distance of the closest training sample.
    pub fn predict(&self, patch: &FacePatch) -> Result<Prediction, RecognizerError> {
        let query = gray_to_mat(patch.as_image())?;
        let mut index = -1;
        let mut distance = f64::MAX;
        self.model
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .predict(&query, &mut index, &mut distance)?;

        let label = usize::try_from(index)
            .ok()
            .and_then(|i| self.labels.get(i))
            .copied()
            .ok_or(RecognizerError::UnknownLabel(index))?;
        Ok(Prediction { label, distance })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[i64] {
        &self.labels
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PATCH_SIZE;
    use image::{GrayImage, Luma};

    fn stripes(horizontal: bool) -> FacePatch {
        FacePatch::from_image(&GrayImage::from_fn(PATCH_SIZE, PATCH_SIZE, |x, y| {
            let band = if horizontal { y / 10 } else { x / 10 };
            Luma([if band % 2 == 0 { 40 } else { 220 }])
        }))
    }

    fn checker() -> FacePatch {
        FacePatch::from_image(&GrayImage::from_fn(PATCH_SIZE, PATCH_SIZE, |x, y| {
            Luma([if (x / 16 + y / 16) % 2 == 0 { 30 } else { 200 }])
        }))
    }

    #[test]
    fn test_identical_patch_distance_zero() {
        let patch = stripes(true);
        let r = LbphRecognizer::train(LbphParams::default(), [(7, &patch)]).unwrap();
        let p = r.predict(&patch).unwrap();
        assert_eq!(p.label, 7);
        assert!(p.distance.abs() < 1e-6, "distance {}", p.distance);
    }

    #[test]
    fn test_nearest_label_wins() {
        let (h, v, c) = (stripes(true), stripes(false), checker());
        let r = LbphRecognizer::train(LbphParams::default(), [(1, &h), (2, &v), (3, &c)]).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.labels(), &[1, 2, 3]);
        assert_eq!(r.predict(&v).unwrap().label, 2);
        assert_eq!(r.predict(&c).unwrap().label, 3);
    }

    #[test]
    fn test_distinct_patterns_are_far_apart() {
        let (h, c) = (stripes(true), checker());
        let r = LbphRecognizer::train(LbphParams::default(), [(1, &h)]).unwrap();
        assert!(r.predict(&c).unwrap().distance > 1.0);
    }

    #[test]
    fn test_ids_wider_than_opencv_labels() {
        let patch = checker();
        let big = i64::from(i32::MAX) + 10;
        let r = LbphRecognizer::train(LbphParams::default(), [(big, &patch)]).unwrap();
        assert_eq!(r.predict(&patch).unwrap().label, big);
    }

    #[test]
    fn test_empty_training_set() {
        let err = LbphRecognizer::train(LbphParams::default(), std::iter::empty()).err().unwrap();
        assert!(matches!(err, RecognizerError::EmptyTrainingSet));
    }

    #[test]
    fn test_invalid_params() {
        let patch = checker();
        for params in [
            LbphParams { radius: 0, ..LbphParams::default() },
            LbphParams { neighbors: 17, ..LbphParams::default() },
            LbphParams { grid_x: 0, ..LbphParams::default() },
        ] {
            let err = LbphRecognizer::train(params, [(1, &patch)]).err().unwrap();
            assert!(matches!(err, RecognizerError::InvalidParams(_)), "{params:?}");
        }
    }
}
