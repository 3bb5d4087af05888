//! Image decoding and pixel-level helpers shared by the inference stages.

use crate::error::{Error, Result};
use image::{GrayImage, RgbImage, imageops};

/// Decode raw image bytes into an RGB image.
///
/// Undecodable bytes are malformed input: the error is permanent and the
/// owning unit of work must not retry it.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let dynamic = image::load_from_memory(bytes).map_err(|e| Error::ImageDecode {
        reason: e.to_string(),
    })?;
    Ok(dynamic.to_rgb8())
}

/// Crop a rectangular window out of an image, clamped to its bounds.
pub fn crop(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    let x = x.min(image.width().saturating_sub(1));
    let y = y.min(image.height().saturating_sub(1));
    let width = width.min(image.width() - x);
    let height = height.min(image.height() - y);
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Convert to grayscale for variance screening.
pub fn to_luma(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

/// Pixel variance of a grayscale image.
///
/// Used to screen out non-informative tiles (uniform soil, tarp, sky)
/// before spending inference time on them.
pub fn luma_variance(image: &GrayImage) -> f64 {
    let pixels = image.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }

    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
    pixels
        .iter()
        .map(|&p| {
            let d = f64::from(p) - mean;
            d * d
        })
        .sum::<f64>()
        / n
}
