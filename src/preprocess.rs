//! Image decoding, resizing, and normalization.

use crate::constants::input;
use crate::error::PredictError;
use crate::inference::{PreparedTensor, TensorLedger};
use image::imageops::FilterType;
use std::io::Cursor;
use tracing::debug;

/// Turns encoded image bytes into model input tensors.
///
/// Both execution paths share this type so they see identical inputs.
#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    ledger: TensorLedger,
}

impl ImagePreprocessor {
    /// Create a preprocessor that registers its tensors in `ledger`.
    pub fn new(ledger: TensorLedger) -> Self {
        Self { ledger }
    }

    /// Ledger tracking the tensors this preprocessor creates.
    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    /// Decode `bytes`, resize to 224x224 (aspect ratio not preserved) and map
    /// each channel from `[0, 255]` to `[-1, 1]`.
    pub fn prepare(&self, bytes: &[u8]) -> Result<PreparedTensor, PredictError> {
        let decoded = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| PredictError::ImageDecode {
                reason: e.to_string(),
            })?
            .decode()
            .map_err(|e| PredictError::ImageDecode {
                reason: e.to_string(),
            })?;

        debug!(
            "Decoded {}x{} image, resizing to {}x{}",
            decoded.width(),
            decoded.height(),
            input::SIZE,
            input::SIZE
        );

        let rgb = decoded
            .resize_exact(input::SIZE, input::SIZE, FilterType::Triangle)
            .into_rgb8();

        let data: Vec<f32> = rgb.as_raw().iter().copied().map(normalize).collect();

        PreparedTensor::new(data, &self.ledger).ok_or_else(|| PredictError::Inference {
            reason: "preprocessed buffer does not match the model input shape".to_string(),
        })
    }
}

/// Map one channel value from `[0, 255]` to `[-1, 1]`.
pub fn normalize(value: u8) -> f32 {
    (f32::from(value) - input::NORMALIZE_CENTER) / input::NORMALIZE_CENTER
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    /// Encode a solid-colour PNG.
    pub(crate) fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(rgb));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_normalize_bounds() {
        assert_eq!(normalize(0), -1.0);
        assert_eq!(normalize(255), 1.0);
        assert!(normalize(128).abs() < 0.01);
    }

    #[test]
    fn test_black_image_is_all_minus_one() {
        let pre = ImagePreprocessor::default();
        let tensor = pre.prepare(&solid_png(32, 32, [0, 0, 0])).unwrap();
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        assert_eq!(tensor.data().len(), 224 * 224 * 3);
        assert!(tensor.data().iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_non_square_image_is_stretched() {
        let pre = ImagePreprocessor::default();
        let tensor = pre.prepare(&solid_png(640, 90, [255, 0, 0])).unwrap();
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        // NHWC: red channel first in each pixel
        assert_eq!(tensor.data()[0], 1.0);
        assert_eq!(tensor.data()[1], -1.0);
        assert_eq!(tensor.data()[2], -1.0);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let pre = ImagePreprocessor::default();
        let result = pre.prepare(b"definitely not an image");
        assert!(matches!(result, Err(PredictError::ImageDecode { .. })));
        assert_eq!(pre.ledger().live(), 0);
    }

    #[test]
    fn test_tensor_counted_until_dropped() {
        let pre = ImagePreprocessor::default();
        let tensor = pre.prepare(&solid_png(8, 8, [10, 20, 30])).unwrap();
        assert_eq!(pre.ledger().live(), 1);
        drop(tensor);
        assert_eq!(pre.ledger().live(), 0);
    }
}
