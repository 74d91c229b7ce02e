//! Bridges `image` buffers into OpenCV matrices.

use image::GrayImage;
use opencv::core::{Mat, Scalar, CV_8UC1};
use opencv::prelude::*;

/// Copy an 8-bit grayscale image into a single-channel `Mat`.
pub fn gray_to_mat(gray: &GrayImage) -> opencv::Result<Mat> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Ok(Mat::default());
    }
    let (rows, cols) = match (i32::try_from(height), i32::try_from(width)) {
        (Ok(rows), Ok(cols)) => (rows, cols),
        _ => {
            return Err(opencv::Error::new(
                opencv::core::StsOutOfRange,
                format!("image {width}x{height} is too large for a Mat"),
            ))
        }
    };

    let mut mat = Mat::new_rows_cols_with_default(rows, cols, CV_8UC1, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(gray.as_raw());
    Ok(mat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_pixels_copied_row_major() {
        let gray = GrayImage::from_fn(5, 3, |x, y| Luma([(y * 10 + x) as u8]));
        let mat = gray_to_mat(&gray).unwrap();
        assert_eq!((mat.rows(), mat.cols()), (3, 5));
        assert_eq!(mat.typ(), CV_8UC1);
        assert_eq!(*mat.at_2d::<u8>(2, 4).unwrap(), 24);
        assert_eq!(*mat.at_2d::<u8>(0, 1).unwrap(), 1);
    }

    #[test]
    fn test_empty_image_gives_empty_mat() {
        let mat = gray_to_mat(&GrayImage::new(0, 0)).unwrap();
        assert!(mat.empty());
    }
}
