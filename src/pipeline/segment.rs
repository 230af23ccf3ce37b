//! Main segmentation pipeline.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::image::{self, RawImage, RawRoiMask};
use crate::model::{Device, ModelSpec, OnnxModel, SegmentationModel, DEFAULT_OUTPUT_NAME};

use super::inference::InferenceEngine;
use super::postprocess::{mask_stats, postprocess_with, MaskEncoding, OutputMask};
use super::preprocess::{preprocess, Normalization, ResizePolicy};

/// Configuration for the segmentation pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// How images are scaled before inference.
    pub resize: ResizePolicy,

    /// Number of foreground classes (background excluded).
    pub class_count: usize,

    /// Base channel width of the network.
    pub base_channel_width: usize,

    /// Per-channel image standardization.
    pub normalization: Normalization,

    /// Device the model and all tensors are placed on.
    pub device: Device,

    /// Encoding of pixels outside the region of interest.
    pub encoding: MaskEncoding,

    /// Name of the score output in the exported graph.
    pub output_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resize: ResizePolicy::default(),
            class_count: 1,
            base_channel_width: 32,
            normalization: Normalization::default(),
            device: Device::Cpu,
            encoding: MaskEncoding::Legacy,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        self.resize.validate()?;
        self.normalization.validate()?;

        if self.class_count != 1 {
            return Err(Error::invalid_parameter(
                "class_count",
                "only a single foreground class is supported",
            ));
        }

        self.model_spec().validate()?;

        if self.output_name.trim().is_empty() {
            return Err(Error::invalid_parameter("output_name", "must not be empty"));
        }

        Ok(())
    }

    /// Construction parameters of the network this configuration expects.
    #[must_use]
    pub const fn model_spec(&self) -> ModelSpec {
        ModelSpec::new(self.class_count, self.base_channel_width)
    }
}

/// Progress of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing has been read yet.
    Idle,
    /// Image and ROI mask are decoded.
    Loaded,
    /// Image and ROI tensors are built on the device.
    Preprocessed,
    /// The timed forward pass produced scores.
    Inferred,
    /// Scores are decoded into a gated mask.
    Postprocessed,
    /// The mask is on disk at the output path.
    Written,
    /// The run finished successfully.
    Done,
    /// A stage returned an error. Terminal.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loaded => "loaded",
            Self::Preprocessed => "preprocessed",
            Self::Inferred => "inferred",
            Self::Postprocessed => "postprocessed",
            Self::Written => "written",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationReport {
    /// Wall time of the warm-up pass.
    pub warmup_time: Duration,
    /// Wall time of the timed forward pass.
    pub inference_time: Duration,
    /// Mask width in pixels.
    pub width: usize,
    /// Mask height in pixels.
    pub height: usize,
    /// Foreground pixels inside the ROI.
    pub foreground_pixels: usize,
    /// Pixels outside the ROI.
    pub outside_roi_pixels: usize,
}

/// Segments one image at a time, restricted to a region of interest.
pub struct Pipeline {
    config: Config,
    model: Box<dyn SegmentationModel>,
    engine: InferenceEngine,
}

impl Pipeline {
    /// Create a pipeline running the ONNX network at `weights_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the model cannot be loaded.
    pub fn new<P: AsRef<Path>>(config: Config, weights_path: P) -> Result<Self> {
        config.validate()?;

        tracing::info!("using {} device.", config.device);

        let model = OnnxModel::load(
            weights_path,
            config.model_spec(),
            config.device,
            &config.output_name,
        )?;

        Self::with_model(config, Box::new(model))
    }

    /// Create a pipeline around an already constructed model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or the model's class
    /// count or device disagrees with it.
    pub fn with_model(config: Config, model: Box<dyn SegmentationModel>) -> Result<Self> {
        config.validate()?;

        let expected = config.model_spec();
        if model.spec().num_classes != expected.num_classes {
            return Err(Error::ShapeMismatch {
                expected: format!("model with {} classes", expected.num_classes),
                actual: format!("{} with {} classes", model.name(), model.spec().num_classes),
            });
        }

        if model.device() != config.device {
            return Err(Error::DeviceMismatch {
                what: format!("model {}", model.name()),
                expected: config.device,
                actual: model.device(),
            });
        }

        tracing::info!("Pipeline initialized with model {}", model.name());

        Ok(Self {
            engine: InferenceEngine::new(config.device),
            config,
            model,
        })
    }

    /// The pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Segment an image read from `image_path` within the mask at `roi_path`,
    /// and write the result to `output_path`.
    ///
    /// Any stale file at `output_path` is removed first, so a failed run never
    /// leaves an earlier result behind.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage fails. Nothing is written in that case.
    pub fn process<P, Q, R>(
        &mut self,
        image_path: P,
        roi_path: Q,
        output_path: R,
    ) -> Result<SegmentationReport>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        R: AsRef<Path>,
    {
        let image_path = image_path.as_ref();
        let roi_path = roi_path.as_ref();
        let output_path = output_path.as_ref();

        image::ensure_inputs_exist([("image", image_path), ("roi mask", roi_path)])?;

        image::remove_stale_output(output_path)?;

        tracing::info!("Processing image: {}", image_path.display());

        let mut stage = Stage::Idle;
        let result = self.run_stages(image_path, roi_path, output_path, &mut stage);

        if let Err(err) = &result {
            tracing::error!("Pipeline failed after stage '{stage}': {err}");
            advance(&mut stage, Stage::Failed);
        }

        result
    }

    /// Segment in-memory inputs without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing, inference, or postprocessing fails.
    pub fn segment(
        &mut self,
        image: &RawImage,
        roi: &RawRoiMask,
    ) -> Result<(OutputMask, SegmentationReport)> {
        let mut stage = Stage::Loaded;
        self.segment_loaded(image, roi, &mut stage)
    }

    fn run_stages(
        &mut self,
        image_path: &Path,
        roi_path: &Path,
        output_path: &Path,
        stage: &mut Stage,
    ) -> Result<SegmentationReport> {
        let roi = image::load_roi(roi_path)?;
        let image = image::load_image(image_path)?;
        advance(stage, Stage::Loaded);

        let (mask, report) = self.segment_loaded(&image, &roi, stage)?;

        tracing::info!("Saving output to: {}", output_path.display());
        image::save_mask(&mask, output_path)?;
        advance(stage, Stage::Written);

        advance(stage, Stage::Done);
        Ok(report)
    }

    fn segment_loaded(
        &mut self,
        image: &RawImage,
        roi: &RawRoiMask,
        stage: &mut Stage,
    ) -> Result<(OutputMask, SegmentationReport)> {
        let (image_tensor, roi_tensor) = preprocess(
            image,
            roi,
            &self.config.normalization,
            self.config.resize,
            self.config.device,
        )?;
        advance(stage, Stage::Preprocessed);

        let inference = self.engine.infer(self.model.as_mut(), &image_tensor)?;
        advance(stage, Stage::Inferred);

        let mask = postprocess_with(&inference.scores, &roi_tensor, self.config.encoding)?;
        advance(stage, Stage::Postprocessed);

        let stats = mask_stats(&mask, &roi_tensor);
        let (height, width) = mask.dim();

        let report = SegmentationReport {
            warmup_time: inference.warmup,
            inference_time: inference.elapsed,
            width,
            height,
            foreground_pixels: stats.foreground,
            outside_roi_pixels: stats.outside_roi,
        };

        Ok((mask, report))
    }
}

/// Load the network at `weights_path` and segment one image with it.
///
/// All three inputs are checked and any stale file at `output_path` is
/// removed before the model is loaded, so a run that fails at any point,
/// model loading included, leaves no output behind.
///
/// # Errors
///
/// Returns an error if an input is missing, the model cannot be loaded, or
/// any stage of [`Pipeline::process`] fails.
pub fn segment_file(
    config: Config,
    weights_path: &Path,
    image_path: &Path,
    roi_path: &Path,
    output_path: &Path,
) -> Result<SegmentationReport> {
    image::ensure_inputs_exist([
        ("weights", weights_path),
        ("image", image_path),
        ("roi mask", roi_path),
    ])?;
    image::remove_stale_output(output_path)?;

    let mut pipeline = Pipeline::new(config, weights_path)?;
    pipeline.process(image_path, roi_path, output_path)
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::debug!("Pipeline stage: {stage} -> {next}");
    *stage = next;
}
