//! Image classification stage.

mod classifier;
mod engine;
mod preprocess;

pub use classifier::{OnnxClassifier, load_labels};
pub use engine::{
    BatchInferenceEngine, InferenceStats, collect_images, compare_names, partition_batches,
    softmax,
};
pub use preprocess::Normalization;

use crate::error::Result;

/// A classifier over fixed-size RGB images.
pub trait ImageClassifier: Send {
    /// Class labels in output order.
    fn labels(&self) -> &[String];

    /// Square input edge length in pixels.
    fn input_size(&self) -> u32;

    /// Run one forward pass.
    ///
    /// `batch` holds `len` images laid out `[len, 3, size, size]`; returns
    /// one logit vector per image in input order.
    fn forward(&mut self, batch: Vec<f32>, len: usize) -> Result<Vec<Vec<f32>>>;
}
