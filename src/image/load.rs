//! Image loading utilities.

use std::path::Path;

use image::{DynamicImage, GenericImageView};

use crate::error::{Error, Result};

use super::{RawImage, RawRoiMask};

/// Check that every `(what, path)` input exists before any work starts.
///
/// All missing inputs are reported together rather than one per run.
///
/// # Errors
///
/// Returns [`Error::NotFound`] for a single missing input and
/// [`Error::MissingInputs`] when several are missing.
pub fn ensure_inputs_exist<'a, I>(inputs: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a Path)>,
{
    let mut missing: Vec<(&str, &Path)> = inputs
        .into_iter()
        .filter(|(_, path)| !path.exists())
        .collect();

    match missing.len() {
        0 => Ok(()),
        1 => {
            let (what, path) = missing.remove(0);
            Err(Error::NotFound {
                what: what.to_string(),
                path: path.to_path_buf(),
            })
        }
        _ => Err(Error::MissingInputs {
            missing: missing
                .iter()
                .map(|(what, path)| format!("{what} {}", path.display()))
                .collect(),
        }),
    }
}

/// Load an image from disk as 8-bit RGB.
///
/// Grayscale, palette and alpha images are converted to RGB.
///
/// # Errors
///
/// Returns an error if the file is missing, cannot be decoded, or is empty.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RawImage> {
    let img = open("image", path.as_ref())?;
    Ok(img.to_rgb8())
}

/// Load a region-of-interest mask from disk as 8-bit grayscale.
///
/// # Errors
///
/// Returns an error if the file is missing, cannot be decoded, or is empty.
pub fn load_roi<P: AsRef<Path>>(path: P) -> Result<RawRoiMask> {
    let img = open("roi mask", path.as_ref())?;
    Ok(img.to_luma8())
}

fn open(what: &str, path: &Path) -> Result<DynamicImage> {
    ensure_inputs_exist([(what, path)])?;

    let img = image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::UnsupportedDimensions {
            width,
            height,
            reason: format!("{what} is empty"),
        });
    }

    tracing::debug!("Loaded {what} {}: {width}x{height}", path.display());

    Ok(img)
}
