//! Conversion of raw class scores into the final ROI-gated mask.

use ndarray::{Array2, Axis, Zip};

use crate::error::{Error, Result};
use crate::model::ScoreTensor;

use super::preprocess::RoiTensor;

/// Per-pixel class index, `(height, width)`.
pub type LabelMap = Array2<usize>;

/// Final 8-bit single channel mask, `(height, width)`.
pub type OutputMask = Array2<u8>;

/// Class index of the foreground.
pub const FOREGROUND_CLASS: usize = 1;

/// Display value of foreground pixels.
pub const FOREGROUND_VALUE: u8 = 255;

/// Display value of background pixels.
pub const BACKGROUND_VALUE: u8 = 0;

/// Value of pixels outside the ROI in [`MaskEncoding::ThreeValued`].
pub const OUTSIDE_ROI_VALUE: u8 = 128;

/// How pixels outside the region of interest are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskEncoding {
    /// Two values: outside-ROI pixels are 255, same as foreground.
    #[default]
    Legacy,
    /// Three values: foreground 255, background 0, outside ROI 128.
    ThreeValued,
}

impl MaskEncoding {
    /// Value forced onto every pixel outside the ROI.
    #[must_use]
    pub const fn outside_roi_value(self) -> u8 {
        match self {
            Self::Legacy => FOREGROUND_VALUE,
            Self::ThreeValued => OUTSIDE_ROI_VALUE,
        }
    }
}

/// Pixel counts of a finished mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskStats {
    /// Pixels predicted as foreground inside the ROI.
    pub foreground: usize,
    /// Pixels outside the ROI.
    pub outside_roi: usize,
}

/// Turn scores into a mask with the legacy two-valued encoding.
///
/// # Errors
///
/// Returns an error if the scores are not `(1, C >= 2, H, W)` with `H x W`
/// equal to the ROI shape.
pub fn postprocess(scores: &ScoreTensor, roi: &RoiTensor) -> Result<OutputMask> {
    postprocess_with(scores, roi, MaskEncoding::Legacy)
}

/// Turn scores into a mask: arg-max, recolor, then force every pixel outside
/// the ROI to the encoding's outside value.
///
/// # Errors
///
/// See [`postprocess`].
pub fn postprocess_with(
    scores: &ScoreTensor,
    roi: &RoiTensor,
    encoding: MaskEncoding,
) -> Result<OutputMask> {
    let labels = argmax_labels(scores)?;

    if labels.dim() != roi.dim() {
        return Err(Error::ShapeMismatch {
            expected: format!("scores matching roi {:?}", roi.shape()),
            actual: format!("{:?}", scores.shape()),
        });
    }

    let mut mask = recolor(&labels);
    apply_roi(&mut mask, roi, encoding.outside_roi_value());

    Ok(mask)
}

/// Arg-max over the class axis of `(1, C, H, W)` scores.
///
/// Ties go to the lowest class index.
///
/// NaN scores are not propagated: unlike a NaN-propagating arg-max, which
/// reports the NaN class as the maximum, a NaN here never beats the current
/// best. Scores `[0.0, NaN]` give class 0, and a NaN in class 0 keeps the
/// pixel at class 0.
///
/// # Errors
///
/// Returns an error if the batch size is not 1 or there are fewer than 2 classes.
pub fn argmax_labels(scores: &ScoreTensor) -> Result<LabelMap> {
    let (batch, classes, height, width) = scores.dim();
    if batch != 1 || classes < 2 {
        return Err(Error::ShapeMismatch {
            expected: "[1, C >= 2, H, W]".to_string(),
            actual: format!("{:?}", scores.shape()),
        });
    }

    let scores = scores.index_axis(Axis(0), 0);

    Ok(Array2::from_shape_fn((height, width), |(y, x)| {
        let mut best = 0;
        let mut best_score = scores[[0, y, x]];
        for c in 1..classes {
            let score = scores[[c, y, x]];
            if score > best_score {
                best = c;
                best_score = score;
            }
        }
        best
    }))
}

/// Map foreground labels to 255 and everything else to 0.
#[must_use]
pub fn recolor(labels: &LabelMap) -> OutputMask {
    labels.mapv(|label| {
        if label == FOREGROUND_CLASS {
            FOREGROUND_VALUE
        } else {
            BACKGROUND_VALUE
        }
    })
}

/// Force every pixel where the ROI is exactly 0 to `outside_value`.
#[allow(clippy::float_cmp)]
pub fn apply_roi(mask: &mut OutputMask, roi: &RoiTensor, outside_value: u8) {
    Zip::from(mask).and(roi).for_each(|pixel, &r| {
        if r == 0.0 {
            *pixel = outside_value;
        }
    });
}

/// Count foreground pixels inside the ROI and pixels outside it.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn mask_stats(mask: &OutputMask, roi: &RoiTensor) -> MaskStats {
    let mut stats = MaskStats::default();
    Zip::from(mask).and(roi).for_each(|&pixel, &r| {
        if r == 0.0 {
            stats.outside_roi += 1;
        } else if pixel == FOREGROUND_VALUE {
            stats.foreground += 1;
        }
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, s, Array4};

    /// Two-class scores where `foreground(y, x)` decides the winner.
    fn scores(height: usize, width: usize, foreground: impl Fn(usize, usize) -> bool) -> ScoreTensor {
        Array4::from_shape_fn((1, 2, height, width), |(_, c, y, x)| {
            let fg = foreground(y, x);
            match (c, fg) {
                (1, true) | (0, false) => 2.0,
                _ => -1.0,
            }
        })
    }

    #[test]
    fn test_argmax_picks_highest_score() {
        let mut s = Array4::<f32>::zeros((1, 3, 1, 3));
        s[[0, 2, 0, 0]] = 5.0;
        s[[0, 1, 0, 1]] = 0.5;
        s[[0, 0, 0, 2]] = 1.0;

        let labels = argmax_labels(&s).unwrap();
        assert_eq!(labels, array![[2, 1, 0]]);
    }

    #[test]
    fn test_argmax_ties_go_to_lowest_class() {
        let s = Array4::<f32>::from_elem((1, 2, 2, 2), 0.7);
        let labels = argmax_labels(&s).unwrap();
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn test_argmax_ignores_nan() {
        let mut s = Array4::<f32>::zeros((1, 2, 1, 1));
        s[[0, 1, 0, 0]] = f32::NAN;
        assert_eq!(argmax_labels(&s).unwrap()[[0, 0]], 0);
    }

    #[test]
    fn test_argmax_nan_in_first_class_stays_background() {
        let mut s = Array4::<f32>::from_elem((1, 2, 1, 2), 1.0);
        s[[0, 0, 0, 0]] = f32::NAN;
        s[[0, 0, 0, 1]] = 0.0;

        let labels = argmax_labels(&s).unwrap();
        assert_eq!(labels[[0, 0]], 0);
        assert_eq!(labels[[0, 1]], 1);
    }

    #[test]
    fn test_outside_roi_forced_to_255() {
        // Half-zero ROI, foreground predicted everywhere
        let roi = RoiTensor::from_shape_fn((4, 6), |(_, x)| if x < 3 { 0.0 } else { 1.0 });
        let s = scores(4, 6, |_, _| true);

        let mask = postprocess(&s, &roi).unwrap();
        assert!(mask.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_outside_roi_overrides_background() {
        let roi = RoiTensor::from_shape_fn((4, 6), |(_, x)| if x < 3 { 0.0 } else { 1.0 });
        let s = scores(4, 6, |_, _| false);

        let mask = postprocess(&s, &roi).unwrap();
        assert!(mask.slice(s![.., ..3]).iter().all(|&v| v == 255));
        assert!(mask.slice(s![.., 3..]).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_all_zero_roi_gives_all_255() {
        let roi = RoiTensor::zeros((5, 5));
        let s = scores(5, 5, |y, x| (x + y) % 2 == 0);

        let mask = postprocess(&s, &roi).unwrap();
        assert!(mask.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_full_roi_background_gives_all_0() {
        let roi = RoiTensor::ones((5, 5));
        let s = scores(5, 5, |_, _| false);

        let mask = postprocess(&s, &roi).unwrap();
        assert!(mask.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_partial_roi_values_count_as_inside() {
        let roi = RoiTensor::from_elem((2, 2), 0.2);
        let s = scores(2, 2, |_, _| false);

        let mask = postprocess(&s, &roi).unwrap();
        assert!(mask.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_three_valued_encoding() {
        let roi = array![[0.0, 1.0, 1.0]];
        let s = scores(1, 3, |_, x| x == 1);

        let mask = postprocess_with(&s, &roi, MaskEncoding::ThreeValued).unwrap();
        assert_eq!(mask, array![[OUTSIDE_ROI_VALUE, 255, 0]]);

        let stats = mask_stats(&mask, &roi);
        assert_eq!(stats, MaskStats { foreground: 1, outside_roi: 1 });
    }

    #[test]
    fn test_deterministic() {
        let roi = RoiTensor::from_shape_fn((8, 8), |(y, _)| if y < 4 { 0.0 } else { 1.0 });
        let s = scores(8, 8, |y, x| (x * 3 + y) % 5 == 0);

        let first = postprocess(&s, &roi).unwrap();
        let second = postprocess(&s, &roi).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let roi = RoiTensor::ones((4, 4));
        let s = scores(4, 5, |_, _| true);
        assert!(matches!(postprocess(&s, &roi), Err(Error::ShapeMismatch { .. })));

        let batched = Array4::<f32>::zeros((2, 2, 4, 4));
        assert!(matches!(postprocess(&batched, &roi), Err(Error::ShapeMismatch { .. })));

        let single_class = Array4::<f32>::zeros((1, 1, 4, 4));
        assert!(argmax_labels(&single_class).is_err());
    }
}
