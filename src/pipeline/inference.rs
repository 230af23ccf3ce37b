//! Warm-up and timed execution of the segmentation model.

use std::time::{Duration, Instant};

use ndarray::Array4;

use crate::error::{Error, Result};
use crate::model::{Device, ScoreTensor, SegmentationModel};

use super::preprocess::ImageTensor;

/// Scores of the timed forward pass and how long it took.
#[derive(Debug, Clone)]
pub struct InferenceReport {
    /// Raw scores, `(1, num_classes, height, width)`.
    pub scores: ScoreTensor,
    /// Wall time of the timed forward pass.
    pub elapsed: Duration,
    /// Wall time of the warm-up pass. Never part of `elapsed`.
    pub warmup: Duration,
}

impl InferenceReport {
    /// Timed inference duration in seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Runs a model on one device with a warm-up call before the timed call.
#[derive(Debug, Clone, Copy)]
pub struct InferenceEngine {
    device: Device,
}

impl InferenceEngine {
    /// Create an engine for `device`.
    #[must_use]
    pub const fn new(device: Device) -> Self {
        Self { device }
    }

    /// Device every model and tensor must agree on.
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    /// Warm the model up, then run and time one forward pass on `image`.
    ///
    /// # Errors
    ///
    /// Returns an error on device disagreement, if the warm-up or timed call
    /// fails, or if the scores do not match the input.
    pub fn infer<M>(&self, model: &mut M, image: &ImageTensor) -> Result<InferenceReport>
    where
        M: SegmentationModel + ?Sized,
    {
        self.check_devices(model, image)?;

        let warmup = self.warm_up(model, image)?;
        tracing::debug!("Warm-up took {warmup:?}");

        let (scores, elapsed) = self.run_timed(model, image)?;

        tracing::info!("inference time: {}", elapsed.as_secs_f64());

        Ok(InferenceReport {
            scores,
            elapsed,
            warmup,
        })
    }

    /// Check that the model and the tensor both live on the engine's device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceMismatch`] naming the side that disagrees.
    pub fn check_devices<M>(&self, model: &M, image: &ImageTensor) -> Result<()>
    where
        M: SegmentationModel + ?Sized,
    {
        if model.device() != self.device {
            return Err(Error::DeviceMismatch {
                what: format!("model {}", model.name()),
                expected: self.device,
                actual: model.device(),
            });
        }

        if image.device() != self.device {
            return Err(Error::DeviceMismatch {
                what: "image tensor".to_string(),
                expected: self.device,
                actual: image.device(),
            });
        }

        Ok(())
    }

    /// Run the model once on zeros shaped like `image` and discard the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WarmUp`] wrapping the model's failure.
    pub fn warm_up<M>(&self, model: &mut M, image: &ImageTensor) -> Result<Duration>
    where
        M: SegmentationModel + ?Sized,
    {
        let zeros = Array4::<f32>::zeros(image.data().raw_dim());
        let start = Instant::now();

        model
            .forward(&zeros)
            .and_then(|_| model.synchronize())
            .map_err(|err| Error::WarmUp {
                source: Box::new(err),
            })?;

        Ok(start.elapsed())
    }

    /// Run and time a single forward pass.
    ///
    /// The model is synchronized before each timestamp so queued device work
    /// is inside the measured interval.
    ///
    /// # Errors
    ///
    /// Model errors are returned unchanged. Scores that are not
    /// `(1, num_classes, height, width)` are a [`Error::ShapeMismatch`].
    pub fn run_timed<M>(&self, model: &mut M, image: &ImageTensor) -> Result<(ScoreTensor, Duration)>
    where
        M: SegmentationModel + ?Sized,
    {
        if model.device().is_accelerator() {
            tracing::debug!("Draining {} queue around the timed call", model.device());
        }

        model.synchronize()?;
        let start = Instant::now();
        let output = model.forward(image.data())?;
        model.synchronize()?;
        let elapsed = start.elapsed();

        check_scores(&output.scores, model.spec().num_classes, image.spatial_dims())?;

        Ok((output.scores, elapsed))
    }
}

/// Warm up `model` and time one forward pass of `image` on `device`.
///
/// # Errors
///
/// See [`InferenceEngine::infer`].
pub fn infer<M>(model: &mut M, image: &ImageTensor, device: Device) -> Result<InferenceReport>
where
    M: SegmentationModel + ?Sized,
{
    InferenceEngine::new(device).infer(model, image)
}

fn check_scores(scores: &ScoreTensor, num_classes: usize, (height, width): (usize, usize)) -> Result<()> {
    if scores.dim() != (1, num_classes, height, width) {
        return Err(Error::ShapeMismatch {
            expected: format!("[1, {num_classes}, {height}, {width}]"),
            actual: format!("{:?}", scores.shape()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstantModel, ModelOutput, ModelSpec};
    use std::thread;

    const SLOW_FIRST_CALL: Duration = Duration::from_millis(60);
    /// Allowed jitter between two steady-state timed calls.
    const TIMING_TOLERANCE: Duration = Duration::from_millis(25);

    fn tensor(height: usize, width: usize) -> ImageTensor {
        ImageTensor::new(Array4::from_elem((1, 3, height, width), 0.5), Device::Cpu)
    }

    /// Records every input and pays a one-time cost on its first call.
    struct RecordingModel {
        spec: ModelSpec,
        inputs: Vec<Array4<f32>>,
        syncs: usize,
        fail_on_call: Option<usize>,
        output_size: Option<(usize, usize)>,
    }

    impl RecordingModel {
        fn new() -> Self {
            Self {
                spec: ModelSpec::default(),
                inputs: Vec::new(),
                syncs: 0,
                fail_on_call: None,
                output_size: None,
            }
        }
    }

    impl SegmentationModel for RecordingModel {
        fn name(&self) -> &str {
            "recording"
        }

        fn device(&self) -> Device {
            Device::Cpu
        }

        fn spec(&self) -> &ModelSpec {
            &self.spec
        }

        fn forward(&mut self, input: &Array4<f32>) -> Result<ModelOutput> {
            self.inputs.push(input.clone());
            if self.inputs.len() == 1 {
                thread::sleep(SLOW_FIRST_CALL);
            }
            if self.fail_on_call == Some(self.inputs.len()) {
                return Err(Error::ModelExecution {
                    model: "recording".to_string(),
                    reason: "out of memory".to_string(),
                });
            }
            let (_, _, h, w) = input.dim();
            let (h, w) = self.output_size.unwrap_or((h, w));
            Ok(ModelOutput {
                scores: Array4::zeros((1, self.spec.num_classes, h, w)),
            })
        }

        fn synchronize(&mut self) -> Result<()> {
            self.syncs += 1;
            Ok(())
        }
    }

    #[test]
    fn test_warm_up_uses_zeros_of_same_shape() {
        let mut model = RecordingModel::new();
        let image = tensor(6, 9);

        let report = infer(&mut model, &image, Device::Cpu).unwrap();

        assert_eq!(model.inputs.len(), 2);
        assert_eq!(model.inputs[0].shape(), &[1, 3, 6, 9]);
        assert!(model.inputs[0].iter().all(|&v| v == 0.0));
        assert_eq!(&model.inputs[1], image.data());
        assert_eq!(report.scores.shape(), &[1, 2, 6, 9]);
    }

    #[test]
    fn test_synchronizes_around_timed_call() {
        let mut model = RecordingModel::new();
        infer(&mut model, &tensor(2, 2), Device::Cpu).unwrap();

        // One after warm-up, one before and one after the timed call
        assert_eq!(model.syncs, 3);
    }

    #[test]
    fn test_warm_up_cost_excluded_from_timing() {
        let mut model = RecordingModel::new();
        let engine = InferenceEngine::new(Device::Cpu);
        let image = tensor(4, 4);

        let report = engine.infer(&mut model, &image).unwrap();
        let (_, second) = engine.run_timed(&mut model, &image).unwrap();

        assert!(report.warmup >= SLOW_FIRST_CALL);
        assert!(report.elapsed < SLOW_FIRST_CALL);
        assert!(report.elapsed_secs() >= 0.0);
        assert!(report.elapsed <= second + TIMING_TOLERANCE);
    }

    #[test]
    fn test_warm_up_failure_is_fatal() {
        let mut model = RecordingModel::new();
        model.fail_on_call = Some(1);

        let result = infer(&mut model, &tensor(2, 2), Device::Cpu);

        assert!(matches!(result, Err(Error::WarmUp { .. })));
        assert_eq!(model.inputs.len(), 1);
    }

    #[test]
    fn test_timed_failure_propagates_unchanged() {
        let mut model = RecordingModel::new();
        model.fail_on_call = Some(2);

        let result = infer(&mut model, &tensor(2, 2), Device::Cpu);

        assert!(matches!(
            result,
            Err(Error::ModelExecution { reason, .. }) if reason == "out of memory"
        ));
    }

    #[test]
    fn test_model_on_other_device_rejected() {
        let mut model =
            ConstantModel::foreground(ModelSpec::default(), Device::Cuda { device_id: 0 }).unwrap();

        let result = infer(&mut model, &tensor(2, 2), Device::Cpu);

        assert!(matches!(result, Err(Error::DeviceMismatch { .. })));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_tensor_on_other_device_rejected() {
        let mut model = ConstantModel::foreground(ModelSpec::default(), Device::Cpu).unwrap();
        let image = ImageTensor::new(Array4::zeros((1, 3, 2, 2)), Device::Cuda { device_id: 1 });

        let result = infer(&mut model, &image, Device::Cpu);

        assert!(matches!(
            result,
            Err(Error::DeviceMismatch { actual: Device::Cuda { device_id: 1 }, .. })
        ));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_wrong_score_size_rejected() {
        let mut model = RecordingModel::new();
        model.output_size = Some((3, 3));

        let result = infer(&mut model, &tensor(4, 4), Device::Cpu);

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
