//! Synthetic faces and a detector that finds them, so engine tests run
//! without cascade files or real photos.

use facewatch_core::{BoundingBox, DetectParams, FaceDetector};
use image::{GrayImage, Luma};
use std::path::{Path, PathBuf};

/// Pixels at or above this value belong to a "face".
const FACE_LEVEL: u8 = 200;

/// Finds bright 4-connected blobs at least `min_size` on each side.
pub struct BlobDetector;

impl FaceDetector for BlobDetector {
    fn detect(&self, gray: &GrayImage, params: &DetectParams) -> Vec<BoundingBox> {
        let (w, h) = gray.dimensions();
        let mut seen = vec![false; (w * h) as usize];
        let mut found = Vec::new();

        for y in 0..h {
            for x in 0..w {
                let i = (y * w + x) as usize;
                if seen[i] || gray.get_pixel(x, y).0[0] < FACE_LEVEL {
                    continue;
                }
                let (mut x0, mut y0, mut x1, mut y1) = (x, y, x, y);
                let mut stack = vec![(x, y)];
                seen[i] = true;
                while let Some((cx, cy)) = stack.pop() {
                    x0 = x0.min(cx);
                    y0 = y0.min(cy);
                    x1 = x1.max(cx);
                    y1 = y1.max(cy);
                    let neighbors = [
                        (cx.wrapping_sub(1), cy),
                        (cx + 1, cy),
                        (cx, cy.wrapping_sub(1)),
                        (cx, cy + 1),
                    ];
                    for (nx, ny) in neighbors {
                        if nx >= w || ny >= h {
                            continue;
                        }
                        let j = (ny * w + nx) as usize;
                        if !seen[j] && gray.get_pixel(nx, ny).0[0] >= FACE_LEVEL {
                            seen[j] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
                let b = BoundingBox::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1);
                if b.width >= params.min_size && b.height >= params.min_size {
                    found.push(b);
                }
            }
        }
        found
    }
}

/// Texture inside a synthetic face, so different people get different LBP codes.
#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    Horizontal,
    Vertical,
    Checker,
}

impl Pattern {
    fn value(self, x: u32, y: u32) -> u8 {
        let on = match self {
            Pattern::Horizontal => (y / 4) % 2 == 0,
            Pattern::Vertical => (x / 4) % 2 == 0,
            Pattern::Checker => ((x / 4) + (y / 4)) % 2 == 0,
        };
        if on {
            250
        } else {
            210
        }
    }
}

/// A dark canvas with one patterned face per `(x, y, side, pattern)`.
pub fn canvas(width: u32, height: u32, faces: &[(u32, u32, u32, Pattern)]) -> GrayImage {
    let mut img = GrayImage::from_pixel(width, height, Luma([20]));
    for &(fx, fy, side, pattern) in faces {
        for y in fy..fy + side {
            for x in fx..fx + side {
                img.put_pixel(x, y, Luma([pattern.value(x - fx, y - fy)]));
            }
        }
    }
    img
}

pub fn portrait(pattern: Pattern) -> GrayImage {
    canvas(240, 240, &[(60, 50, 120, pattern)])
}

pub fn group_photo() -> GrayImage {
    canvas(400, 200, &[(20, 40, 100, Pattern::Checker), (260, 40, 100, Pattern::Vertical)])
}

pub fn blank_photo() -> GrayImage {
    canvas(200, 200, &[])
}

/// Save `img` as PNG under `dir/name` and return the path.
pub fn save(dir: &Path, name: &str, img: &GrayImage) -> PathBuf {
    let path = dir.join(name);
    img.save_with_format(&path, image::ImageFormat::Png)
        .expect("write fixture");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_detector_counts_faces() {
        let params = DetectParams::default();
        assert_eq!(BlobDetector.detect(&portrait(Pattern::Horizontal), &params).len(), 1);
        assert_eq!(BlobDetector.detect(&group_photo(), &params).len(), 2);
        assert!(BlobDetector.detect(&blank_photo(), &params).is_empty());
    }

    #[test]
    fn test_blob_detector_box() {
        let faces = BlobDetector.detect(&portrait(Pattern::Checker), &DetectParams::default());
        assert_eq!(faces[0], BoundingBox::new(60, 50, 120, 120));
    }
}
