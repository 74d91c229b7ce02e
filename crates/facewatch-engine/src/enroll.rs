//! Enrollment: validate a photo, store it, record the person, retrain.

use crate::model::{load_gray, ModelManager};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("image file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not read the image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face found in the image")]
    NoFaceFound,
    #[error("found multiple faces ({0}) in the image; use a photo with exactly one face")]
    MultipleFacesFound(usize),
    #[error("storage failure: {0}")]
    Storage(#[from] facewatch_store::Error),
    #[error("could not store the photo: {0}")]
    Io(#[from] std::io::Error),
}

impl EnrollError {
    /// Whether the failure is down to the submitted photo rather than the system.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EnrollError::NotFound(_)
                | EnrollError::Decode(_)
                | EnrollError::NoFaceFound
                | EnrollError::MultipleFacesFound(_)
        )
    }
}

/// What callers outside the engine see of an enrollment attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollOutcome {
    pub success: bool,
    pub message: String,
    pub person_id: Option<i64>,
}

pub struct Enroller {
    models: Arc<ModelManager>,
    photo_dir: PathBuf,
}

impl Enroller {
    pub fn new(models: Arc<ModelManager>, photo_dir: impl Into<PathBuf>) -> Self {
        Self {
            models,
            photo_dir: photo_dir.into(),
        }
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    /// Enroll `name` from the photo at `image_path`. Never fails; the outcome
    /// carries the reason instead.
    pub fn enroll(&self, name: &str, image_path: &Path) -> EnrollOutcome {
        match self.try_enroll(name, image_path) {
            Ok(id) => EnrollOutcome {
                success: true,
                message: format!("{name} was added successfully"),
                person_id: Some(id),
            },
            Err(e) => {
                if e.is_rejection() {
                    tracing::info!(name, photo = %image_path.display(), reason = %e, "enrollment rejected");
                } else {
                    tracing::error!(name, photo = %image_path.display(), error = %e, "enrollment failed");
                }
                EnrollOutcome {
                    success: false,
                    message: e.to_string(),
                    person_id: None,
                }
            }
        }
    }

    /// Enroll and return the new person id.
    ///
    /// Nothing is written unless the photo holds exactly one face.
    pub fn try_enroll(&self, name: &str, image_path: &Path) -> Result<i64, EnrollError> {
        if !image_path.is_file() {
            return Err(EnrollError::NotFound(image_path.to_path_buf()));
        }

        let gray = load_gray(image_path)?;
        let faces = self
            .models
            .detector()
            .detect(&gray, self.models.detect_params());
        match faces.len() {
            0 => return Err(EnrollError::NoFaceFound),
            1 => {}
            n => return Err(EnrollError::MultipleFacesFound(n)),
        }

        let stored = self.store_photo(image_path)?;
        let id = match self.models.store().add_person(name, &stored.path) {
            Ok(id) => id,
            Err(e) => {
                if stored.copied {
                    let _ = std::fs::remove_file(&stored.path);
                }
                return Err(e.into());
            }
        };

        tracing::info!(id, name, photo = %stored.path.display(), "person enrolled");
        self.retrain();
        Ok(id)
    }

    /// Delete a person and their photo, retraining if anything was removed.
    pub fn remove(&self, id: i64) -> Result<bool, EnrollError> {
        let removed = self.models.store().delete_person(id)?;
        if removed {
            self.retrain();
        }
        Ok(removed)
    }

    /// Rebuild after a committed change. The change stands either way; on
    /// failure the previous model stays in service until the next rebuild.
    fn retrain(&self) {
        if let Err(e) = self.models.rebuild() {
            tracing::error!(error = %e, "store changed but retraining failed; keeping the previous model");
        }
    }

    /// Copy the source into the photo directory under a random short name.
    fn store_photo(&self, source: &Path) -> Result<StoredPhoto, EnrollError> {
        std::fs::create_dir_all(&self.photo_dir)?;

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map_or_else(|| "jpg".to_string(), str::to_ascii_lowercase);
        let short_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let dest = self.photo_dir.join(format!("{short_id}.{ext}"));

        if same_file(source, &dest) {
            return Ok(StoredPhoto {
                path: dest,
                copied: false,
            });
        }

        std::fs::copy(source, &dest)?;
        Ok(StoredPhoto {
            path: dest,
            copied: true,
        })
    }
}

struct StoredPhoto {
    path: PathBuf,
    copied: bool,
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{blank_photo, group_photo, portrait, save, BlobDetector, Pattern};
    use facewatch_core::DetectParams;
    use facewatch_store::PersonStore;

    fn enroller(photo_dir: &Path) -> Enroller {
        let models = Arc::new(ModelManager::new(
            Arc::new(PersonStore::open_in_memory().unwrap()),
            Arc::new(BlobDetector),
            DetectParams::default(),
            100.0,
        ));
        Enroller::new(models, photo_dir)
    }

    #[test]
    fn test_single_face_enrolls_and_trains() {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        let e = enroller(&photos);
        let src = save(dir.path(), "sara.png", &portrait(Pattern::Horizontal));

        let outcome = e.enroll("Sara", &src);
        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.message.contains("Sara"));

        let id = outcome.person_id.unwrap();
        let person = e.models().store().person(id).unwrap().unwrap();
        assert_eq!(person.name, "Sara");
        assert!(person.photo_path.starts_with(&photos));
        assert!(person.photo_path.exists());
        assert_eq!(person.photo_path.extension().unwrap(), "png");
        let stem = person.photo_path.file_stem().unwrap().to_str().unwrap();
        assert_eq!(stem.len(), 8);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(e.models().trained_ids(), vec![id]);
        // the source is copied, not moved
        assert!(src.exists());
    }

    #[test]
    fn test_multiple_faces_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let e = enroller(&dir.path().join("photos"));
        let src = save(dir.path(), "group.png", &group_photo());

        let err = e.try_enroll("Group", &src).unwrap_err();
        assert!(matches!(err, EnrollError::MultipleFacesFound(2)));

        let outcome = e.enroll("Group", &src);
        assert!(!outcome.success);
        assert!(outcome.message.contains("multiple faces"));
        assert_eq!(e.models().store().count().unwrap(), 0);
    }

    #[test]
    fn test_no_face_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let e = enroller(&dir.path().join("photos"));
        let src = save(dir.path(), "blank.png", &blank_photo());

        assert!(matches!(e.try_enroll("Nobody", &src), Err(EnrollError::NoFaceFound)));
        assert_eq!(e.models().store().count().unwrap(), 0);
        assert!(!dir.path().join("photos").exists());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let e = enroller(&dir.path().join("photos"));
        let err = e.try_enroll("x", &dir.path().join("nope.jpg")).unwrap_err();
        assert!(matches!(err, EnrollError::NotFound(_)));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        let e = enroller(&dir.path().join("photos"));
        let src = dir.path().join("broken.jpg");
        std::fs::write(&src, b"definitely not a jpeg").unwrap();
        assert!(matches!(e.try_enroll("x", &src), Err(EnrollError::Decode(_))));
    }

    #[test]
    fn test_extensionless_source_stored_as_jpg() {
        let dir = tempfile::tempdir().unwrap();
        let e = enroller(&dir.path().join("photos"));
        let src = save(dir.path(), "upload", &portrait(Pattern::Checker));

        let id = e.try_enroll("Lina", &src).unwrap();
        let person = e.models().store().person(id).unwrap().unwrap();
        assert_eq!(person.photo_path.extension().unwrap(), "jpg");
        // content sniffing still finds the PNG
        assert_eq!(e.models().trained_ids(), vec![id]);
    }

    #[test]
    fn test_retrain_failure_keeps_committed_person() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("people.db");
        let models = Arc::new(ModelManager::new(
            Arc::new(PersonStore::open(&db).unwrap()),
            Arc::new(BlobDetector),
            DetectParams::default(),
            100.0,
        ));
        let e = Enroller::new(models, dir.path().join("photos"));

        // a row the store cannot read back makes every rebuild fail
        rusqlite::Connection::open(&db)
            .unwrap()
            .execute(
                "INSERT INTO people (name, photo_path, created_at) VALUES ('bad', '/x.png', 'garbage')",
                [],
            )
            .unwrap();
        assert!(e.models().rebuild().is_err());

        let src = save(dir.path(), "sara.png", &portrait(Pattern::Horizontal));
        let outcome = e.enroll("Sara", &src);
        assert!(outcome.success, "{}", outcome.message);

        let id = outcome.person_id.unwrap();
        let person = e.models().store().person(id).unwrap().unwrap();
        assert!(person.photo_path.exists());
        assert_eq!(e.models().store().count().unwrap(), 2);
        assert!(!e.models().is_trained());

        assert!(e.remove(id).unwrap());
        assert!(!person.photo_path.exists());
    }

    #[test]
    fn test_remove_deletes_and_retrains() {
        let dir = tempfile::tempdir().unwrap();
        let e = enroller(&dir.path().join("photos"));
        let sara = e
            .try_enroll("Sara", &save(dir.path(), "s.png", &portrait(Pattern::Horizontal)))
            .unwrap();
        let omar = e
            .try_enroll("Omar", &save(dir.path(), "o.png", &portrait(Pattern::Vertical)))
            .unwrap();
        let photo = e.models().store().person(sara).unwrap().unwrap().photo_path;

        assert!(e.remove(sara).unwrap());
        assert!(e.models().store().person(sara).unwrap().is_none());
        assert!(!photo.exists());
        assert_eq!(e.models().trained_ids(), vec![omar]);
        let names: Vec<String> = e
            .models()
            .store()
            .all_people()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Omar".to_string()]);

        assert!(!e.remove(sara).unwrap());
    }
}
