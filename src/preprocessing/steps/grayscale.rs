use crate::error::ScanError;
use image::{DynamicImage, GrayImage, Luma};

/// Convert the decoded photo to an 8-bit luminance buffer
///
/// Transparent regions are flattened onto white so they read as paper, not
/// as ink.
pub fn apply(image: &DynamicImage) -> Result<GrayImage, ScanError> {
    if !image.color().has_alpha() {
        return Ok(image.to_luma8());
    }

    let with_alpha = image.to_luma_alpha8();
    Ok(GrayImage::from_fn(with_alpha.width(), with_alpha.height(), |x, y| {
        let [luma, alpha] = with_alpha.get_pixel(x, y).0;
        let a = alpha as u32;
        Luma([((luma as u32 * a + 255 * (255 - a) + 127) / 255) as u8])
    }))
}
