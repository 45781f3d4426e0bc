use crate::error::ScanError;
use image::GrayImage;

/// Fraction of pixels at each end of the histogram ignored when picking the
/// stretch bounds
const CLIP_FRACTION: f64 = 0.005;

/// Stretch contrast between the clipped dark and light ends of the histogram
///
/// Specular glare or a black table edge would otherwise pin the range, so the
/// darkest and lightest half percent saturate instead.
pub fn apply(mut gray: GrayImage) -> Result<GrayImage, ScanError> {
    let (low, high) = clipped_bounds(&gray, CLIP_FRACTION);
    if high <= low {
        return Ok(gray);
    }

    let range = (high - low) as f32;
    let mut lut = [0u8; 256];
    for (value, out) in lut.iter_mut().enumerate() {
        let v = value.clamp(low as usize, high as usize) - low as usize;
        *out = (v as f32 / range * 255.0).round() as u8;
    }

    for pixel in gray.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
    Ok(gray)
}

/// Gray levels below which `fraction` of the pixels lie, from each end
pub(crate) fn clipped_bounds(img: &GrayImage, fraction: f64) -> (u8, u8) {
    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return (0, 0);
    }
    let cut = (total as f64 * fraction).floor() as u64;

    let mut seen = 0;
    let mut low = 0u8;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > cut {
            low = value as u8;
            break;
        }
    }

    seen = 0;
    let mut high = 255u8;
    for (value, count) in histogram.iter().enumerate().rev() {
        seen += count;
        if seen > cut {
            high = value as u8;
            break;
        }
    }

    (low, high)
}
