//! The segmentation model boundary.
//!
//! The pipeline never depends on a concrete network. Anything implementing
//! [`SegmentationModel`] can be plugged in: an ONNX Runtime session
//! ([`OnnxModel`]), the constant stub ([`ConstantModel`]), or a remote call.

mod device;
mod onnx;
mod stub;

pub use device::Device;
pub use onnx::{OnnxModel, DEFAULT_OUTPUT_NAME};
pub use stub::ConstantModel;

use ndarray::Array4;

use crate::error::{Error, Result};
use crate::image::RGB_CHANNELS;

/// Raw per-pixel class scores in NCHW format `(1, classes, height, width)`.
pub type ScoreTensor = Array4<f32>;

/// Output of a single forward pass.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Raw logits, `(1, num_classes, height, width)`.
    pub scores: ScoreTensor,
}

/// Construction parameters of an encoder-decoder segmentation network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    /// Input channel count. Always 3 (RGB).
    pub in_channels: usize,
    /// Output class count, background included.
    pub num_classes: usize,
    /// Base channel width of the first encoder stage.
    pub base_channels: usize,
}

impl ModelSpec {
    /// Describe a model predicting `class_count` foreground classes plus background.
    #[must_use]
    pub const fn new(class_count: usize, base_channels: usize) -> Self {
        Self {
            in_channels: RGB_CHANNELS,
            num_classes: class_count + 1,
            base_channels,
        }
    }

    /// Validate the model description.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.in_channels != RGB_CHANNELS {
            return Err(Error::invalid_parameter(
                "in_channels",
                format!("must be {RGB_CHANNELS}"),
            ));
        }

        if self.num_classes < 2 {
            return Err(Error::invalid_parameter(
                "num_classes",
                "must include background and at least one foreground class",
            ));
        }

        if self.base_channels == 0 {
            return Err(Error::invalid_parameter(
                "base_channels",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::new(1, 32)
    }
}

/// A segmentation network: `(1, 3, H, W)` in, `(1, C, H, W)` scores out.
///
/// Implementations are driven through `&mut self`, one call at a time.
pub trait SegmentationModel {
    /// Human readable name, used in logs and errors.
    fn name(&self) -> &str;

    /// Device holding the model parameters.
    fn device(&self) -> Device;

    /// Construction parameters of the network.
    fn spec(&self) -> &ModelSpec;

    /// Run one forward pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the model fails to execute.
    fn forward(&mut self, input: &Array4<f32>) -> Result<ModelOutput>;

    /// Block until all queued work on the model's device has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the device reports a failure while draining.
    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }
}
