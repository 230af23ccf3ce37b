//! # roiseg
//!
//! Binary semantic segmentation of a single image, restricted to a region of
//! interest.
//!
//! An RGB image is resized and standardized, run through an encoder-decoder
//! network (a `UNet` exported to ONNX, or any [`model::SegmentationModel`]),
//! decoded with a per-pixel arg-max and gated by the ROI mask. Pixels outside
//! the ROI are marked as don't-care.
//!
//! ## Example
//!
//! ```no_run
//! use roiseg::{Config, Pipeline};
//!
//! # fn main() -> roiseg::Result<()> {
//! let config = Config::default();
//! let mut pipeline = Pipeline::new(config, "unet.onnx")?;
//!
//! let report = pipeline.process("image.bmp", "roi.bmp", "test_result.png")?;
//! println!("inference time: {}", report.inference_time.as_secs_f64());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};
pub use model::{Device, SegmentationModel};
pub use pipeline::{
    segment_file, Config, MaskEncoding, Pipeline, ResizePolicy, SegmentationReport,
};
