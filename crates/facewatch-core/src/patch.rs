//! Normalized face crops used for both training and prediction.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Side length, in pixels, of every face patch.
pub const PATCH_SIZE: u32 = 200;

/// A grayscale face crop resized to `PATCH_SIZE`×`PATCH_SIZE`.
#[derive(Debug, Clone, PartialEq)]
pub struct FacePatch(GrayImage);

impl FacePatch {
    /// Crop `face` out of `gray` and resize it. Returns `None` if the box
    /// lies entirely outside the image.
    pub fn extract(gray: &GrayImage, face: &BoundingBox) -> Option<Self> {
        let b = face.clamp_to(gray.width(), gray.height())?;
        let crop = imageops::crop_imm(gray, b.x, b.y, b.width, b.height).to_image();
        Some(Self::from_image(&crop))
    }

    /// Resize an already-cropped face.
    pub fn from_image(face: &GrayImage) -> Self {
        if face.dimensions() == (PATCH_SIZE, PATCH_SIZE) {
            return Self(face.clone());
        }
        Self(imageops::resize(face, PATCH_SIZE, PATCH_SIZE, FilterType::Triangle))
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_extract_resizes_to_patch_size() {
        let img = GrayImage::from_pixel(640, 480, Luma([90]));
        let patch = FacePatch::extract(&img, &BoundingBox::new(100, 50, 64, 80)).unwrap();
        assert_eq!(patch.as_image().dimensions(), (PATCH_SIZE, PATCH_SIZE));
        assert!(patch.as_image().pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn test_extract_clips_overhang() {
        let img = GrayImage::new(100, 100);
        assert!(FacePatch::extract(&img, &BoundingBox::new(80, 80, 50, 50)).is_some());
        assert!(FacePatch::extract(&img, &BoundingBox::new(120, 0, 50, 50)).is_none());
    }
}
