use crate::error::ScanError;
use image::{imageops::FilterType, GrayImage};

/// Smallest working side; anything below cannot hold a readable bubble grid
const MIN_DIMENSION: u32 = 64;

/// Bound the working resolution of a photo
/// Phone cameras deliver 12+ megapixel frames; marker search and warping cost
/// grows with pixel count while the template only needs its own page size.
/// Images are never upscaled.
pub fn apply(gray: GrayImage, max_dimension: u32) -> Result<GrayImage, ScanError> {
    let (width, height) = gray.dimensions();

    if width.min(height) < MIN_DIMENSION {
        return Err(ScanError::ImageDecode(format!(
            "image is too small to hold an answer sheet ({}x{})",
            width, height
        )));
    }

    let longest = width.max(height);
    if longest <= max_dimension {
        return Ok(gray);
    }

    let scale = max_dimension as f32 / longest as f32;
    let new_width = ((width as f32 * scale).round() as u32).max(1);
    let new_height = ((height as f32 * scale).round() as u32).max(1);

    tracing::debug!(
        "Downscaling {}x{} to {}x{}",
        width,
        height,
        new_width,
        new_height
    );

    Ok(image::imageops::resize(
        &gray,
        new_width,
        new_height,
        FilterType::Triangle,
    ))
}
