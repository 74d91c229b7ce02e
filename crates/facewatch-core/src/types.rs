use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned face region in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Clip the box to an image of the given size. Returns `None` when
    /// nothing of the box remains inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(BoundingBox::new(self.x, self.y, w, h))
    }
}

/// Geometric tolerance for a multi-scale detection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Window growth per pyramid level (must be > 1.0).
    pub scale_factor: f64,
    /// Raw hits a group needs beyond this count to be reported. 0 disables grouping.
    pub min_neighbors: u32,
    /// Smallest window side, in source pixels.
    pub min_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 30,
        }
    }
}

/// Strategy for locating faces in a grayscale image.
///
/// Detection never fails once the detector is constructed: an image with no
/// faces simply yields an empty list.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Vec<BoundingBox>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_inside() {
        let b = BoundingBox::new(10, 10, 20, 20);
        assert_eq!(b.clamp_to(100, 100), Some(b));
    }

    #[test]
    fn test_clamp_overhang() {
        let b = BoundingBox::new(90, 95, 20, 20);
        assert_eq!(b.clamp_to(100, 100), Some(BoundingBox::new(90, 95, 10, 5)));
    }

    #[test]
    fn test_clamp_outside() {
        let b = BoundingBox::new(100, 0, 20, 20);
        assert_eq!(b.clamp_to(100, 100), None);
    }

    #[test]
    fn test_default_params() {
        let p = DetectParams::default();
        assert!((p.scale_factor - 1.1).abs() < 1e-9);
        assert_eq!(p.min_neighbors, 5);
        assert_eq!(p.min_size, 30);
    }
}
