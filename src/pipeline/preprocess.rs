//! Conversion of decoded images into network-ready tensors.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::{Array2, Array4};

use crate::error::{Error, Result};
use crate::image::{RawImage, RawRoiMask, RGB_CHANNELS};
use crate::model::Device;

/// Per-channel mean of the ImageNet training set, RGB order.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation of the ImageNet training set, RGB order.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Default target size of the resize step.
pub const DEFAULT_TARGET_SIZE: u32 = 480;

/// How input images are scaled before inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePolicy {
    /// Scale the shorter side to the given size, keeping the aspect ratio.
    ShorterSide(u32),
    /// Scale the height to the given size, keeping the aspect ratio.
    Height(u32),
    /// Scale to a fixed size, ignoring the aspect ratio.
    Exact { width: u32, height: u32 },
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self::ShorterSide(DEFAULT_TARGET_SIZE)
    }
}

impl ResizePolicy {
    /// Output `(width, height)` for an input of `width x height`.
    ///
    /// The scaled side is truncated, never rounded, and clamped to at least 1.
    #[must_use]
    pub fn target_dims(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            Self::ShorterSide(size) if width <= height => (size, scale(size, height, width)),
            Self::ShorterSide(size) => (scale(size, width, height), size),
            Self::Height(size) => (scale(size, width, height), size),
            Self::Exact { width, height } => (width, height),
        }
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if a target size is zero.
    pub fn validate(&self) -> Result<()> {
        let valid = match *self {
            Self::ShorterSide(size) | Self::Height(size) => size > 0,
            Self::Exact { width, height } => width > 0 && height > 0,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::invalid_parameter(
                "target_size",
                "must be greater than 0",
            ))
        }
    }
}

/// `size * numerator / denominator`, truncated and clamped to `[1, u32::MAX]`.
fn scale(size: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = u64::from(size) * u64::from(numerator) / u64::from(denominator.max(1));
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

/// Per-channel standardization applied to the image tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    /// Channel means in `[0, 1]` pixel units, RGB order.
    pub mean: [f32; 3],
    /// Channel standard deviations in `[0, 1]` pixel units, RGB order.
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl Normalization {
    /// Validate the statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is not finite or a deviation is not positive.
    pub fn validate(&self) -> Result<()> {
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(Error::invalid_parameter(
                "normalization_mean",
                "values must be finite",
            ));
        }

        for (i, &s) in self.std.iter().enumerate() {
            if !s.is_finite() || s <= 0.0 {
                return Err(Error::invalid_parameter(
                    "normalization_std",
                    format!("value at index {i} must be greater than 0, got {s}"),
                ));
            }
        }

        Ok(())
    }

    #[inline]
    fn apply(&self, channel: usize, pixel: u8) -> f32 {
        (f32::from(pixel) / 255.0 - self.mean[channel]) / self.std[channel]
    }
}

/// Normalized image in NCHW format `(1, 3, height, width)`, prepared for one device.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array4<f32>,
    device: Device,
}

impl ImageTensor {
    /// Wrap an NCHW array prepared for `device`.
    #[must_use]
    pub const fn new(data: Array4<f32>, device: Device) -> Self {
        Self { data, device }
    }

    /// The underlying `(1, 3, height, width)` array.
    #[must_use]
    pub const fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Device the tensor was prepared for.
    #[must_use]
    pub const fn device(&self) -> Device {
        self.device
    }

    /// Spatial size as `(height, width)`.
    #[must_use]
    pub fn spatial_dims(&self) -> (usize, usize) {
        let (_, _, height, width) = self.data.dim();
        (height, width)
    }
}

/// Region-of-interest mask scaled to `[0, 1]`, `(height, width)`.
pub type RoiTensor = Array2<f32>;

/// Resize and normalize an image and its ROI mask into aligned tensors.
///
/// The image is resized with a bilinear filter and standardized per channel.
/// The ROI is resized with nearest-neighbour sampling, so its values stay the
/// source mask values, and scaled to `[0, 1]` without standardization.
///
/// Both inputs get their own target size under `policy`; the ROI is then
/// resampled to the image tensor's actual size. A ROI whose target size
/// differs from the image's (a different aspect ratio) is rejected.
///
/// # Errors
///
/// Returns an error if the statistics or policy are invalid, or if the ROI
/// cannot be aligned with the image.
pub fn preprocess(
    image: &RawImage,
    roi: &RawRoiMask,
    normalization: &Normalization,
    policy: ResizePolicy,
    device: Device,
) -> Result<(ImageTensor, RoiTensor)> {
    normalization.validate()?;
    policy.validate()?;

    let (width, height) = policy.target_dims(image.width(), image.height());
    let roi_dims = policy.target_dims(roi.width(), roi.height());

    if roi_dims != (width, height) {
        return Err(Error::ShapeMismatch {
            expected: format!("roi resized to {width}x{height} like the image"),
            actual: format!(
                "{}x{} roi resized to {}x{}",
                roi.width(),
                roi.height(),
                roi_dims.0,
                roi_dims.1
            ),
        });
    }

    let resized_image = resize_rgb(image, width, height);
    let image_tensor = image_to_tensor(&resized_image, normalization);

    // Align on the image tensor's actual shape, not the nominal target
    let (tensor_height, tensor_width) = {
        let (_, _, h, w) = image_tensor.dim();
        (h, w)
    };
    let resized_roi = resize_gray(
        roi,
        u32::try_from(tensor_width).unwrap_or(width),
        u32::try_from(tensor_height).unwrap_or(height),
    );
    let roi_tensor = roi_to_tensor(&resized_roi);

    if roi_tensor.dim() != (tensor_height, tensor_width) {
        return Err(Error::ShapeMismatch {
            expected: format!("[{tensor_height}, {tensor_width}]"),
            actual: format!("{:?}", roi_tensor.shape()),
        });
    }

    tracing::debug!(
        "Preprocessed {}x{} image to [1, 3, {tensor_height}, {tensor_width}] for {device}",
        image.width(),
        image.height()
    );

    Ok((ImageTensor::new(image_tensor, device), roi_tensor))
}

fn resize_rgb(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}

fn resize_gray(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        imageops::resize(mask, width, height, FilterType::Nearest)
    }
}

/// Convert an RGB image to a standardized NCHW tensor.
#[allow(clippy::cast_possible_truncation)]
fn image_to_tensor(rgb: &RgbImage, normalization: &Normalization) -> Array4<f32> {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, height, width));

    for y in 0..height {
        for x in 0..width {
            // Safe: x and y are bounded by the image dimensions which fit in u32
            let pixel = rgb.get_pixel(x as u32, y as u32);
            for c in 0..RGB_CHANNELS {
                tensor[[0, c, y, x]] = normalization.apply(c, pixel[c]);
            }
        }
    }

    tensor
}

/// Convert a grayscale mask to a `(height, width)` tensor in `[0, 1]`.
#[allow(clippy::cast_possible_truncation)]
fn roi_to_tensor(mask: &GrayImage) -> RoiTensor {
    let (width, height) = (mask.width() as usize, mask.height() as usize);

    // Safe: x and y are bounded by the mask dimensions which fit in u32
    Array2::from_shape_fn((height, width), |(y, x)| {
        f32::from(mask.get_pixel(x as u32, y as u32)[0]) / 255.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_shorter_side_policy() {
        let policy = ResizePolicy::ShorterSide(480);
        assert_eq!(policy.target_dims(512, 512), (480, 480));
        assert_eq!(policy.target_dims(640, 480), (640, 480));
        assert_eq!(policy.target_dims(1000, 500), (960, 480));
        // Truncated, not rounded: 480 * 701 / 500 = 672.96
        assert_eq!(policy.target_dims(500, 701), (480, 672));
    }

    #[test]
    fn test_height_and_exact_policies() {
        assert_eq!(ResizePolicy::Height(480).target_dims(1000, 500), (960, 480));
        assert_eq!(ResizePolicy::Height(480).target_dims(500, 1000), (240, 480));
        let exact = ResizePolicy::Exact {
            width: 64,
            height: 32,
        };
        assert_eq!(exact.target_dims(7, 900), (64, 32));
    }

    #[test]
    fn test_degenerate_sizes_clamp_to_one() {
        assert_eq!(ResizePolicy::Height(2).target_dims(1, 100), (1, 2));
        assert!(ResizePolicy::ShorterSide(0).validate().is_err());
    }

    #[test]
    fn test_tensor_shapes_match() {
        let image = RgbImage::new(512, 512);
        let roi = GrayImage::from_pixel(512, 512, Luma([255]));

        let (tensor, roi_tensor) = preprocess(
            &image,
            &roi,
            &Normalization::default(),
            ResizePolicy::default(),
            Device::Cpu,
        )
        .unwrap();

        assert_eq!(tensor.data().shape(), &[1, 3, 480, 480]);
        assert_eq!(roi_tensor.shape(), &[480, 480]);
        assert_eq!(tensor.spatial_dims(), roi_tensor.dim());
        assert_eq!(tensor.device(), Device::Cpu);
    }

    #[test]
    fn test_black_image_normalization() {
        let image = RgbImage::new(20, 10);
        let roi = GrayImage::new(20, 10);

        let (tensor, _) = preprocess(
            &image,
            &roi,
            &Normalization::default(),
            ResizePolicy::Height(10),
            Device::Cpu,
        )
        .unwrap();

        for c in 0..3 {
            let expected = -IMAGENET_MEAN[c] / IMAGENET_STD[c];
            let value = tensor.data()[[0, c, 5, 7]];
            assert!((value - expected).abs() < 1e-5, "channel {c}: {value}");
        }
    }

    #[test]
    fn test_channel_order_is_rgb() {
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
        let roi = GrayImage::new(4, 4);
        let identity = Normalization {
            mean: [0.0; 3],
            std: [1.0; 3],
        };

        let (tensor, _) =
            preprocess(&image, &roi, &identity, ResizePolicy::Height(4), Device::Cpu).unwrap();

        assert!((tensor.data()[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
        assert!(tensor.data()[[0, 1, 1, 1]].abs() < 1e-6);
        assert!(tensor.data()[[0, 2, 1, 1]].abs() < 1e-6);
    }

    #[test]
    fn test_roi_is_scaled_not_standardized() {
        let image = RgbImage::new(100, 100);
        let roi = GrayImage::from_fn(100, 100, |x, _| if x < 50 { Luma([0]) } else { Luma([255]) });

        let (_, roi_tensor) = preprocess(
            &image,
            &roi,
            &Normalization::default(),
            ResizePolicy::ShorterSide(60),
            Device::Cpu,
        )
        .unwrap();

        // Nearest-neighbour sampling keeps the mask binary
        assert!(roi_tensor.iter().all(|&v| v == 0.0 || v == 1.0));
        assert_eq!(roi_tensor[[30, 0]], 0.0);
        assert_eq!(roi_tensor[[30, 59]], 1.0);
    }

    #[test]
    fn test_lower_resolution_roi_is_aligned() {
        let image = RgbImage::new(512, 512);
        let roi = GrayImage::from_pixel(256, 256, Luma([255]));

        let (tensor, roi_tensor) = preprocess(
            &image,
            &roi,
            &Normalization::default(),
            ResizePolicy::default(),
            Device::Cpu,
        )
        .unwrap();

        assert_eq!(tensor.spatial_dims(), (480, 480));
        assert_eq!(roi_tensor.dim(), (480, 480));
        assert!(roi_tensor.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_mismatched_aspect_ratio_rejected() {
        let image = RgbImage::new(512, 512);
        let roi = GrayImage::new(512, 256);

        let result = preprocess(
            &image,
            &roi,
            &Normalization::default(),
            ResizePolicy::default(),
            Device::Cpu,
        );

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_invalid_std_rejected() {
        let norm = Normalization {
            mean: IMAGENET_MEAN,
            std: [0.229, 0.0, 0.225],
        };
        let result = preprocess(
            &RgbImage::new(4, 4),
            &GrayImage::new(4, 4),
            &norm,
            ResizePolicy::default(),
            Device::Cpu,
        );
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }
}
