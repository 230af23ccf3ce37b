//! A network stand-in that predicts the same class everywhere.

use ndarray::{s, Array4};

use crate::error::{Error, Result};

use super::{Device, ModelOutput, ModelSpec, SegmentationModel};

/// Stub model whose scores favour one fixed class at every pixel.
///
/// Useful for dry runs of the pipeline without trained weights.
#[derive(Debug, Clone)]
pub struct ConstantModel {
    spec: ModelSpec,
    device: Device,
    class: usize,
    calls: usize,
}

impl ConstantModel {
    /// Create a stub predicting `class` at every pixel.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid or `class` is not one of its classes.
    pub fn new(spec: ModelSpec, device: Device, class: usize) -> Result<Self> {
        spec.validate()?;

        if class >= spec.num_classes {
            return Err(Error::invalid_parameter(
                "class",
                format!("must be below {}", spec.num_classes),
            ));
        }

        Ok(Self {
            spec,
            device,
            class,
            calls: 0,
        })
    }

    /// Stub predicting foreground (class 1) everywhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid.
    pub fn foreground(spec: ModelSpec, device: Device) -> Result<Self> {
        Self::new(spec, device, 1)
    }

    /// Stub predicting background (class 0) everywhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is invalid.
    pub fn background(spec: ModelSpec, device: Device) -> Result<Self> {
        Self::new(spec, device, 0)
    }

    /// Number of forward passes run so far, warm-up included.
    #[must_use]
    pub const fn calls(&self) -> usize {
        self.calls
    }
}

impl SegmentationModel for ConstantModel {
    fn name(&self) -> &str {
        "constant"
    }

    fn device(&self) -> Device {
        self.device
    }

    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn forward(&mut self, input: &Array4<f32>) -> Result<ModelOutput> {
        let (batch, channels, height, width) = input.dim();
        if batch != 1 || channels != self.spec.in_channels {
            return Err(Error::ShapeMismatch {
                expected: format!("[1, {}, H, W]", self.spec.in_channels),
                actual: format!("{:?}", input.shape()),
            });
        }

        self.calls += 1;

        let mut scores = Array4::<f32>::zeros((1, self.spec.num_classes, height, width));
        scores.slice_mut(s![0, self.class, .., ..]).fill(1.0);

        Ok(ModelOutput { scores })
    }
}
