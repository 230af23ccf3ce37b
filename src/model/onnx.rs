//! ONNX Runtime binding of the segmentation model.

use std::path::Path;

use ndarray::Array4;
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::SessionBuilder;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};

use super::{Device, ModelOutput, ModelSpec, SegmentationModel};

/// Name of the score output in exported segmentation graphs.
pub const DEFAULT_OUTPUT_NAME: &str = "out";

/// A segmentation network exported to ONNX and run with ONNX Runtime.
pub struct OnnxModel {
    session: Session,
    name: String,
    spec: ModelSpec,
    device: Device,
    output_name: String,
}

impl OnnxModel {
    /// Load an exported network and bind it to `device`.
    ///
    /// The execution provider for `device` must register successfully; there
    /// is no silent fallback to the CPU.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights are missing, the spec is invalid, or
    /// the session cannot be created on the requested device.
    pub fn load<P: AsRef<Path>>(
        path: P,
        spec: ModelSpec,
        device: Device,
        output_name: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        spec.validate()?;

        if !path.exists() {
            return Err(Error::NotFound {
                what: "weights".to_string(),
                path: path.to_path_buf(),
            });
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("model.onnx")
            .to_string();

        tracing::info!("Loading {name} on {device} ({spec:?})");

        let session = session_builder(device)
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|source| Error::ModelLoad {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            session,
            name,
            spec,
            device,
            output_name: output_name.to_string(),
        })
    }
}

impl SegmentationModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<ModelOutput> {
        let input_value =
            Tensor::from_array(input.clone()).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        // Prefer the named score output, fall back to the first one
        let (_, output) = outputs
            .iter()
            .find(|(name, _)| *name == self.output_name)
            .or_else(|| outputs.iter().next())
            .ok_or_else(|| Error::ShapeMismatch {
                expected: format!("'{}' output", self.output_name),
                actual: "no output".to_string(),
            })?;

        let scores = extract_array4(&output)?;

        Ok(ModelOutput { scores })
    }

    // `Session::run` returns once outputs are copied back to host memory, so
    // there is never queued work left to drain.
}

/// Create a session builder with the execution provider for `device`.
fn session_builder(device: Device) -> std::result::Result<SessionBuilder, ort::Error> {
    Session::builder()?.with_execution_providers([execution_provider(device)?])
}

fn execution_provider(device: Device) -> std::result::Result<ExecutionProviderDispatch, ort::Error> {
    match device {
        Device::Cpu => Ok(CPUExecutionProvider::default().build().error_on_failure()),
        #[cfg(feature = "cuda")]
        Device::Cuda { device_id } => Ok(ort::execution_providers::CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build()
            .error_on_failure()),
        #[cfg(not(feature = "cuda"))]
        Device::Cuda { .. } => Err(ort::Error::new(
            "CUDA execution provider requested but cuda feature is not enabled",
        )),
    }
}

/// Extract a 4D array from an ONNX value.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn extract_array4(value: &ort::value::ValueRef<'_>) -> Result<Array4<f32>> {
    let (shape_info, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|source| Error::Inference { source })?;

    // Safe: tensor dimensions are always non-negative and within bounds
    let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();

    if dims.len() != 4 {
        return Err(Error::ShapeMismatch {
            expected: "4D score tensor".to_string(),
            actual: format!("{}D tensor", dims.len()),
        });
    }

    Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), data.to_vec()).map_err(|_| {
        Error::ShapeMismatch {
            expected: format!("{dims:?}"),
            actual: "reshape failed".to_string(),
        }
    })
}
