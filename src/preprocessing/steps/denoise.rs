use crate::error::ScanError;
use image::GrayImage;
use imageproc::filter::median_filter;

/// Apply median filter to reduce sensor noise and paper grain
/// Median filter keeps marker and bubble edges sharp, unlike a Gaussian blur
pub fn apply(gray: GrayImage) -> Result<GrayImage, ScanError> {
    // 3x3 median filter (radius 1) - effective for salt-and-pepper noise
    Ok(median_filter(&gray, 1, 1))
}
