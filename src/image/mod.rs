//! Image loading and mask saving utilities.

mod load;
mod save;

pub use load::{ensure_inputs_exist, load_image, load_roi};
pub use save::{remove_stale_output, save_mask};

use image::{GrayImage, RgbImage};

/// Decoded 8-bit RGB image, `height x width x 3`.
pub type RawImage = RgbImage;

/// Decoded 8-bit single channel region-of-interest mask.
pub type RawRoiMask = GrayImage;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;
