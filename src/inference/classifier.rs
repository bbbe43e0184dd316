//! ONNX Runtime image classifier.

use super::ImageClassifier;
use crate::config::InferenceDevice;
use crate::constants::batch_size;
use crate::error::{Error, Result};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, info, warn};

/// Classifier backed by an ONNX model taking `[N, 3, H, W]` float input
/// and producing `[N, classes]` logits.
pub struct OnnxClassifier {
    session: Session,
    labels: Vec<String>,
    input_size: u32,
    accelerated: bool,
}

impl OnnxClassifier {
    /// Load a model and its labels file.
    pub fn load(
        model_path: &Path,
        labels_path: &Path,
        input_size: u32,
        device: InferenceDevice,
    ) -> Result<Self> {
        let labels = load_labels(labels_path)?;

        let builder = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?;

        let (mut builder, accelerated) = configure_device(builder, device)?;

        let session = builder.commit_from_file(model_path).map_err(load_error)?;

        info!(
            "Loaded model: {}, {} classes, input {}x{}, device: {}",
            model_path.display(),
            labels.len(),
            input_size,
            input_size,
            if accelerated { "CUDA" } else { "CPU" }
        );

        Ok(Self {
            session,
            labels,
            input_size,
            accelerated,
        })
    }

    /// Batch size for this classifier: explicit value, else by device.
    pub fn batch_size(&self, configured: Option<usize>) -> usize {
        configured.unwrap_or(if self.accelerated {
            batch_size::GPU
        } else {
            batch_size::CPU
        })
    }
}

fn load_error(e: impl std::fmt::Display) -> Error {
    Error::ClassifierLoad {
        reason: e.to_string(),
    }
}

#[cfg(feature = "cuda")]
fn configure_device(
    builder: ort::session::builder::SessionBuilder,
    device: InferenceDevice,
) -> Result<(ort::session::builder::SessionBuilder, bool)> {
    use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};

    if device == InferenceDevice::Cpu {
        info!("Requested device: CPU");
        return Ok((builder, false));
    }

    let cuda = CUDAExecutionProvider::default();
    match cuda.is_available() {
        Ok(true) => {
            let builder = builder
                .with_execution_providers([cuda.build()])
                .map_err(load_error)?;
            info!("Using CUDA execution provider");
            Ok((builder, true))
        }
        _ => {
            if device == InferenceDevice::Gpu {
                warn!("GPU requested but CUDA is not available, using CPU");
            } else {
                debug!("Auto mode: CUDA not available, using CPU");
            }
            Ok((builder, false))
        }
    }
}

#[cfg(not(feature = "cuda"))]
#[allow(clippy::unnecessary_wraps)]
fn configure_device(
    builder: ort::session::builder::SessionBuilder,
    device: InferenceDevice,
) -> Result<(ort::session::builder::SessionBuilder, bool)> {
    match device {
        InferenceDevice::Gpu => warn!("GPU requested but built without CUDA support, using CPU"),
        InferenceDevice::Auto => debug!("Auto mode: built without CUDA support, using CPU"),
        InferenceDevice::Cpu => info!("Requested device: CPU"),
    }
    Ok((builder, false))
}

/// Read a newline-separated labels file, ignoring blank lines.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::ClassifierLoad {
        reason: format!("cannot read labels '{}': {e}", path.display()),
    })?;

    let labels: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(ToString::to_string)
        .collect();

    if labels.len() < 2 {
        return Err(Error::ClassifierLoad {
            reason: format!(
                "labels file '{}' must list at least two classes, found {}",
                path.display(),
                labels.len()
            ),
        });
    }

    Ok(labels)
}

impl ImageClassifier for OnnxClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn forward(&mut self, batch: Vec<f32>, len: usize) -> Result<Vec<Vec<f32>>> {
        let side = self.input_size as usize;
        let input = Tensor::from_array(([len, 3, side, side], batch)).map_err(|e| {
            Error::Inference {
                reason: e.to_string(),
            }
        })?;

        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| Error::Inference {
                reason: e.to_string(),
            })?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Inference {
                reason: e.to_string(),
            })?;

        let classes = self.labels.len();
        if logits.len() != len * classes {
            return Err(Error::Inference {
                reason: format!(
                    "model returned {} values for {len} image(s) and {classes} classes",
                    logits.len()
                ),
            });
        }

        Ok(logits.chunks(classes).map(<[f32]>::to_vec).collect())
    }
}
