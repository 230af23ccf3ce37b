//! ROI-gated segmentation pipeline.

mod inference;
mod postprocess;
mod preprocess;
mod segment;

pub use inference::{infer, InferenceEngine, InferenceReport};
pub use postprocess::{
    apply_roi, argmax_labels, mask_stats, postprocess, postprocess_with, recolor, LabelMap,
    MaskEncoding, MaskStats, OutputMask, BACKGROUND_VALUE, FOREGROUND_CLASS, FOREGROUND_VALUE,
    OUTSIDE_ROI_VALUE,
};
pub use preprocess::{
    preprocess, ImageTensor, Normalization, ResizePolicy, RoiTensor, DEFAULT_TARGET_SIZE,
    IMAGENET_MEAN, IMAGENET_STD,
};
pub use segment::{segment_file, Config, Pipeline, SegmentationReport, Stage};
