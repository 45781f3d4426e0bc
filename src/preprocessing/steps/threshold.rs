use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};

/// Dynamic range / 2 for 8-bit images
const R: f32 = 128.0;

/// Sauvola adaptive thresholding
///
/// For each pixel, threshold = mean * (1 + k * (std_dev / R - 1)) over a
/// `window`-sized neighborhood. Dark pixels (at or below the threshold) become
/// 0, everything else 255. Unlike a global Otsu cut this survives shadows and
/// lighting gradients across a photographed sheet.
pub fn sauvola(img: &GrayImage, window: u32, k: f32) -> GrayImage {
    let (width, height) = img.dimensions();
    let half_window = (window.max(3) / 2) as i64;

    // Precompute integral images for efficient window statistics
    let integrals = IntegralImages::new(img);

    GrayImage::from_fn(width, height, |x, y| {
        let x1 = (x as i64 - half_window).max(0) as u32;
        let y1 = (y as i64 - half_window).max(0) as u32;
        let x2 = (x as i64 + half_window).min(width as i64 - 1) as u32;
        let y2 = (y as i64 + half_window).min(height as i64 - 1) as u32;

        let (mean, std_dev) = integrals.window_stats(x1, y1, x2, y2);

        let threshold = mean * (1.0 + k * (std_dev / R - 1.0));

        let pixel = img.get_pixel(x, y).0[0] as f32;
        if pixel > threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Summed-area tables of the pixel values and their squares
struct IntegralImages {
    sum: ImageBuffer<Luma<u64>, Vec<u64>>,
    sum_sq: ImageBuffer<Luma<u64>, Vec<u64>>,
}

impl IntegralImages {
    fn new(img: &GrayImage) -> Self {
        Self {
            sum: integral_image::<_, u64>(img),
            sum_sq: integral_squared_image::<_, u64>(img),
        }
    }

    /// Mean and standard deviation of the inclusive window (x1,y1)-(x2,y2)
    fn window_stats(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> (f32, f32) {
        let area = ((x2 - x1 + 1) as u64 * (y2 - y1 + 1) as u64) as f64;
        let [sum] = sum_image_pixels(&self.sum, x1, y1, x2, y2);
        let [sum_sq] = sum_image_pixels(&self.sum_sq, x1, y1, x2, y2);

        let mean = sum as f64 / area;
        let variance = (sum_sq as f64 / area) - (mean * mean);
        let std_dev = variance.max(0.0).sqrt();

        (mean as f32, std_dev as f32)
    }
}
