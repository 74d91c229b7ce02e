//! Trained recognition state and the manager that rebuilds it from the store.
//!
//! A [`RecognitionModel`] is an immutable snapshot: the OpenCV LBPH recognizer plus
//! the id→name map of everyone it was trained on. [`ModelManager`] rebuilds a
//! fresh snapshot from every stored photo and swaps it in atomically, so
//! classifiers holding the old `Arc` finish their frame undisturbed.

use facewatch_core::{
    DetectParams, FaceDetector, FacePatch, LbphParams, LbphRecognizer, Prediction,
};
use facewatch_store::PersonStore;
use image::GrayImage;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// A person the model can name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
}

/// Outcome of classifying one face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// `None` when the face matches no one closely enough.
    pub identity: Option<Identity>,
    /// `100 - distance` for a match, 0 otherwise.
    pub confidence: f64,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            identity: None,
            confidence: 0.0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    /// Display label, using `unknown` for unmatched faces.
    pub fn label<'a>(&'a self, unknown: &'a str) -> &'a str {
        self.identity.as_ref().map_or(unknown, |i| i.name.as_str())
    }
}

/// Apply the match threshold to a raw prediction.
///
/// A prediction only names someone when its distance is strictly below
/// `threshold` and its label is in `names`.
pub fn resolve(prediction: Prediction, names: &HashMap<i64, String>, threshold: f64) -> Classification {
    if prediction.distance >= threshold {
        return Classification::unknown();
    }
    match names.get(&prediction.label) {
        Some(name) => Classification {
            identity: Some(Identity {
                id: prediction.label,
                name: name.clone(),
            }),
            confidence: 100.0 - prediction.distance,
        },
        None => Classification::unknown(),
    }
}

/// One trained (or untrained) snapshot.
pub struct RecognitionModel {
    names: HashMap<i64, String>,
    recognizer: Option<LbphRecognizer>,
    threshold: f64,
}

impl RecognitionModel {
    pub fn untrained(threshold: f64) -> Self {
        Self {
            names: HashMap::new(),
            recognizer: None,
            threshold,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Ids of everyone the recognizer was trained on, ascending.
    pub fn trained_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.names.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn name(&self, id: i64) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn classify(&self, patch: &FacePatch) -> Classification {
        match &self.recognizer {
            None => Classification::unknown(),
            Some(recognizer) => match recognizer.predict(patch) {
                Ok(prediction) => resolve(prediction, &self.names, self.threshold),
                Err(e) => {
                    tracing::warn!(error = %e, "prediction failed");
                    Classification::unknown()
                }
            },
        }
    }
}

/// Counts from one rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub trained: usize,
    pub skipped: usize,
}

/// Owns the current [`RecognitionModel`] and rebuilds it from the store.
pub struct ModelManager {
    store: Arc<PersonStore>,
    detector: Arc<dyn FaceDetector>,
    params: DetectParams,
    lbph: LbphParams,
    threshold: f64,
    current: RwLock<Arc<RecognitionModel>>,
}

impl ModelManager {
    /// Start with an untrained model; call [`rebuild`](Self::rebuild) to load the store.
    pub fn new(
        store: Arc<PersonStore>,
        detector: Arc<dyn FaceDetector>,
        params: DetectParams,
        threshold: f64,
    ) -> Self {
        Self {
            store,
            detector,
            params,
            lbph: LbphParams::default(),
            threshold,
            current: RwLock::new(Arc::new(RecognitionModel::untrained(threshold))),
        }
    }

    pub fn store(&self) -> &Arc<PersonStore> {
        &self.store
    }

    pub fn detector(&self) -> &Arc<dyn FaceDetector> {
        &self.detector
    }

    pub fn detect_params(&self) -> &DetectParams {
        &self.params
    }

    /// Retrain from every stored photo and swap the result in.
    ///
    /// Photos that are missing, undecodable or faceless are skipped with a
    /// warning; their rows stay in the store.
    pub fn rebuild(&self) -> Result<RebuildSummary, facewatch_store::Error> {
        let people = self.store.all_people()?;
        let mut samples: Vec<(i64, FacePatch)> = Vec::with_capacity(people.len());
        let mut names = HashMap::new();
        let mut skipped = 0usize;

        for person in &people {
            let gray = match load_gray(&person.photo_path) {
                Ok(gray) => gray,
                Err(e) => {
                    tracing::warn!(id = person.id, name = %person.name, photo = %person.photo_path.display(), error = %e, "skipping unreadable photo");
                    skipped += 1;
                    continue;
                }
            };

            let faces = self.detector.detect(&gray, &self.params);
            let Some(patch) = faces.first().and_then(|face| FacePatch::extract(&gray, face)) else {
                tracing::warn!(id = person.id, name = %person.name, "no face found in stored photo");
                skipped += 1;
                continue;
            };

            samples.push((person.id, patch));
            names.insert(person.id, person.name.clone());
        }

        let recognizer = if samples.is_empty() {
            None
        } else {
            match LbphRecognizer::train(self.lbph, samples.iter().map(|(id, p)| (*id, p))) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::error!(error = %e, "training failed, model left untrained");
                    names.clear();
                    None
                }
            }
        };

        let summary = RebuildSummary {
            trained: samples.len(),
            skipped,
        };
        let model = RecognitionModel {
            names,
            recognizer,
            threshold: self.threshold,
        };

        if model.is_trained() {
            tracing::info!(trained = summary.trained, skipped = summary.skipped, "recognition model rebuilt");
        } else {
            tracing::info!(skipped = summary.skipped, "no usable faces; recognition model untrained");
        }

        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(model);
        Ok(summary)
    }

    /// The current snapshot. Holders keep it alive across later rebuilds.
    pub fn snapshot(&self) -> Arc<RecognitionModel> {
        self.current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn classify(&self, patch: &FacePatch) -> Classification {
        self.snapshot().classify(patch)
    }

    pub fn is_trained(&self) -> bool {
        self.snapshot().is_trained()
    }

    pub fn trained_ids(&self) -> Vec<i64> {
        self.snapshot().trained_ids()
    }
}

/// Decode an image file as 8-bit luma, sniffing the format from its bytes.
pub fn load_gray(path: &Path) -> image::ImageResult<GrayImage> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(img.to_luma8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{blank_photo, portrait, save, BlobDetector, Pattern};

    fn manager() -> ModelManager {
        ModelManager::new(
            Arc::new(PersonStore::open_in_memory().unwrap()),
            Arc::new(BlobDetector),
            DetectParams::default(),
            100.0,
        )
    }

    fn patch_of(pattern: Pattern) -> FacePatch {
        let img = portrait(pattern);
        let face = BlobDetector.detect(&img, &DetectParams::default())[0];
        FacePatch::extract(&img, &face).unwrap()
    }

    #[test]
    fn test_untrained_classifies_unknown() {
        let m = manager();
        assert!(!m.is_trained());
        let c = m.classify(&patch_of(Pattern::Horizontal));
        assert_eq!(c, Classification::unknown());
        assert_eq!(c.label("Unknown"), "Unknown");
    }

    #[test]
    fn test_rebuild_trains_on_stored_people() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager();
        let sara = m
            .store()
            .add_person("Sara", &save(dir.path(), "a.png", &portrait(Pattern::Horizontal)))
            .unwrap();
        let omar = m
            .store()
            .add_person("Omar", &save(dir.path(), "b.png", &portrait(Pattern::Vertical)))
            .unwrap();

        let summary = m.rebuild().unwrap();
        assert_eq!(summary, RebuildSummary { trained: 2, skipped: 0 });
        assert!(m.is_trained());
        assert_eq!(m.trained_ids(), vec![sara, omar]);

        let c = m.classify(&patch_of(Pattern::Vertical));
        assert_eq!(c.identity, Some(Identity { id: omar, name: "Omar".into() }));
        assert!((c.confidence - 100.0).abs() < 1e-6);
        assert_eq!(c.label("Unknown"), "Omar");
    }

    #[test]
    fn test_rebuild_skips_missing_and_faceless_photos() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager();
        let ok = m
            .store()
            .add_person("ok", &save(dir.path(), "ok.png", &portrait(Pattern::Checker)))
            .unwrap();
        m.store().add_person("gone", Path::new("/nonexistent/x.png")).unwrap();
        m.store()
            .add_person("blank", &save(dir.path(), "blank.png", &blank_photo()))
            .unwrap();
        let garbage = dir.path().join("garbage.jpg");
        std::fs::write(&garbage, b"not an image").unwrap();
        m.store().add_person("garbage", &garbage).unwrap();

        let summary = m.rebuild().unwrap();
        assert_eq!(summary, RebuildSummary { trained: 1, skipped: 3 });
        assert_eq!(m.trained_ids(), vec![ok]);
        assert_eq!(m.store().count().unwrap(), 4);
    }

    #[test]
    fn test_rebuild_of_empty_store_is_untrained() {
        let m = manager();
        assert_eq!(m.rebuild().unwrap(), RebuildSummary { trained: 0, skipped: 0 });
        assert!(!m.is_trained());
    }

    #[test]
    fn test_old_snapshot_survives_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager();
        let id = m
            .store()
            .add_person("Sara", &save(dir.path(), "a.png", &portrait(Pattern::Horizontal)))
            .unwrap();
        m.rebuild().unwrap();
        let held = m.snapshot();

        m.store().delete_person(id).unwrap();
        m.rebuild().unwrap();

        assert!(held.is_trained());
        assert_eq!(held.name(id), Some("Sara"));
        assert!(!m.is_trained());
    }

    #[test]
    fn test_resolve_threshold() {
        let names = HashMap::from([(3, "Lina".to_string())]);

        let near = resolve(Prediction { label: 3, distance: 30.0 }, &names, 100.0);
        assert_eq!(near.label("?"), "Lina");
        assert!((near.confidence - 70.0).abs() < 1e-9);

        let far = resolve(Prediction { label: 3, distance: 150.0 }, &names, 100.0);
        assert_eq!(far, Classification::unknown());

        let edge = resolve(Prediction { label: 3, distance: 100.0 }, &names, 100.0);
        assert!(!edge.is_known());

        let stranger = resolve(Prediction { label: 9, distance: 1.0 }, &names, 100.0);
        assert!(!stranger.is_known());
    }
}
