//! Image loading and normalisation.

use crate::error::{Error, Result};
use image::imageops::FilterType;
use std::path::Path;

/// Colour normalisation applied after resizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    /// Square edge length images are resized to.
    pub size: u32,
    /// Per-channel mean subtracted after scaling to `[0, 1]`.
    pub mean: [f32; 3],
    /// Per-channel standard deviation divided out after mean subtraction.
    pub std: [f32; 3],
}

impl Normalization {
    /// Number of floats one image occupies.
    pub fn tensor_len(&self) -> usize {
        3 * (self.size as usize) * (self.size as usize)
    }

    /// Decode `path` and return a normalised CHW tensor.
    pub fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path).map_err(|e| Error::ImageDecode {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(self.apply(&img.to_rgb8()))
    }

    /// Resize and normalise an RGB image to a CHW tensor.
    pub fn apply(&self, rgb: &image::RgbImage) -> Vec<f32> {
        let resized = image::imageops::resize(rgb, self.size, self.size, FilterType::Triangle);
        let plane = (self.size as usize) * (self.size as usize);
        let mut out = vec![0.0f32; 3 * plane];

        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                let v = f32::from(pixel[c]) / 255.0;
                out[c * plane + i] = (v - self.mean[c]) / self.std[c];
            }
        }
        out
    }
}
