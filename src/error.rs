//! Custom error types for roiseg.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::Device;

/// Main error type for the roiseg library.
#[derive(Error, Debug)]
pub enum Error {
    /// A required input file does not exist.
    #[error("{what} not found: {}", .path.display())]
    NotFound { what: String, path: PathBuf },

    /// One or more required inputs are missing. Every missing path is listed.
    #[error("missing inputs: {}", .missing.join(", "))]
    MissingInputs { missing: Vec<String> },

    /// Failed to decode an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to write an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Image dimensions are not supported.
    #[error("unsupported image dimensions {width}x{height}: {reason}")]
    UnsupportedDimensions {
        width: u32,
        height: u32,
        reason: String,
    },

    /// Failed to load an ONNX model.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// ONNX Runtime failed while running the model.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// A model implementation reported a failure of its own.
    #[error("model {model} failed: {reason}")]
    ModelExecution { model: String, reason: String },

    /// The warm-up call failed, so the timed call would fail the same way.
    #[error("model warm-up failed: {source}")]
    WarmUp {
        #[source]
        source: Box<Error>,
    },

    /// A tensor or the model lives on a different device than the run.
    #[error("device mismatch: expected {expected}, got {actual} ({what})")]
    DeviceMismatch {
        what: String,
        expected: Device,
        actual: Device,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

impl Error {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for roiseg operations.
pub type Result<T> = std::result::Result<T, Error>;
