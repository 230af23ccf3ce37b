//! Mask saving utilities.

use std::fs;
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageError, ImageFormat};
use ndarray::Array2;

use crate::error::{Error, Result};

/// Save a single channel 8-bit mask.
///
/// The mask is:
/// 1. Converted from a `(height, width)` array to a grayscale image
/// 2. Encoded into a temporary file next to `path` (format inferred from the
///    extension, PNG when unknown)
/// 3. Renamed over `path`
///
/// A failed save never leaves a truncated file at `path`.
///
/// # Errors
///
/// Returns an error if the image cannot be encoded or written.
pub fn save_mask<P: AsRef<Path>>(mask: &Array2<u8>, path: P) -> Result<()> {
    let path = path.as_ref();
    let img = mask_to_image(mask)?;

    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Png);
    let temp_path = temp_path_for(path);

    let written = img
        .save_with_format(&temp_path, format)
        .and_then(|()| fs::rename(&temp_path, path).map_err(ImageError::IoError));

    if let Err(source) = written {
        // Best effort: the partial file is useless either way
        let _ = fs::remove_file(&temp_path);
        return Err(Error::ImageSave {
            path: path.to_path_buf(),
            source,
        });
    }

    tracing::debug!("Wrote {}x{} mask to {}", img.width(), img.height(), path.display());

    Ok(())
}

/// Delete a result left at `path` by an earlier run.
///
/// Does nothing when `path` is not a regular file.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be removed.
pub fn remove_stale_output<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.is_file() {
        tracing::debug!("Removing stale output {}", path.display());
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Convert a `(height, width)` array to a grayscale image.
#[allow(clippy::cast_possible_truncation)]
fn mask_to_image(mask: &Array2<u8>) -> Result<GrayImage> {
    let (height, width) = mask.dim();

    let too_large = || Error::UnsupportedDimensions {
        width: u32::try_from(width).unwrap_or(u32::MAX),
        height: u32::try_from(height).unwrap_or(u32::MAX),
        reason: "mask does not fit an image".to_string(),
    };
    let w = u32::try_from(width).map_err(|_| too_large())?;
    let h = u32::try_from(height).map_err(|_| too_large())?;

    if w == 0 || h == 0 {
        return Err(Error::UnsupportedDimensions {
            width: w,
            height: h,
            reason: "mask is empty".to_string(),
        });
    }

    // Safe: x and y are bounded by w and h which fit in u32
    Ok(GrayImage::from_fn(w, h, |x, y| {
        image::Luma([mask[[y as usize, x as usize]]])
    }))
}

/// Hidden sibling of `path` used while encoding.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "mask".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{file_name}.partial"))
}
