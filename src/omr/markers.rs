//! Fiducial marker search
//!
//! The sheet carries a solid square at each corner. We binarize the photo with
//! Sauvola thresholding, label the dark connected components, keep the ones
//! whose size and shape fit a marker, and pick one per image quadrant.

use crate::error::ScanError;
use crate::preprocessing::steps::threshold::sauvola;
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

/// Candidate area band, as multiples of the expected marker side; the low end
/// admits sheets that fill only a quarter of the frame width
const MIN_SIDE_FACTOR: f32 = 0.25;
const MAX_SIDE_FACTOR: f32 = 2.5;
/// Bounding box aspect ratio band (short side / long side)
const MIN_SQUARENESS: f32 = 0.6;
/// A square rotated by 15 degrees still covers ~0.54 of its bounding box
const MIN_BOX_FILL: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct MarkerParams {
    /// Smallest Sauvola window; the actual window spans twice the marker side
    pub min_window: u32,
    /// Sauvola sensitivity
    pub k: f32,
}

impl Default for MarkerParams {
    fn default() -> Self {
        Self {
            min_window: 31,
            k: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
}

impl Corner {
    /// Clockwise from top-left
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomRight,
        Corner::BottomLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Corner::TopLeft => "top-left",
            Corner::TopRight => "top-right",
            Corner::BottomRight => "bottom-right",
            Corner::BottomLeft => "bottom-left",
        }
    }

    fn of_point(x: f32, y: f32, width: u32, height: u32) -> Corner {
        let left = x < width as f32 / 2.0;
        let top = y < height as f32 / 2.0;
        match (top, left) {
            (true, true) => Corner::TopLeft,
            (true, false) => Corner::TopRight,
            (false, false) => Corner::BottomRight,
            (false, true) => Corner::BottomLeft,
        }
    }

    fn image_point(&self, width: u32, height: u32) -> (f32, f32) {
        let (w, h) = (width as f32, height as f32);
        match self {
            Corner::TopLeft => (0.0, 0.0),
            Corner::TopRight => (w, 0.0),
            Corner::BottomRight => (w, h),
            Corner::BottomLeft => (0.0, h),
        }
    }

    fn index(&self) -> usize {
        match self {
            Corner::TopLeft => 0,
            Corner::TopRight => 1,
            Corner::BottomRight => 2,
            Corner::BottomLeft => 3,
        }
    }
}

/// A located fiducial marker
#[derive(Debug, Clone)]
pub struct Marker {
    pub corner: Corner,
    /// Centroid of the marker's dark pixels
    pub center: (f32, f32),
    pub width: u32,
    pub height: u32,
}

/// The four markers in clockwise order from top-left
#[derive(Debug, Clone)]
pub struct MarkerSet {
    pub markers: [Marker; 4],
}

impl MarkerSet {
    pub fn centers(&self) -> [(f32, f32); 4] {
        [
            self.markers[0].center,
            self.markers[1].center,
            self.markers[2].center,
            self.markers[3].center,
        ]
    }
}

/// Running statistics of one connected component
#[derive(Debug, Clone, Copy)]
struct Component {
    area: u32,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    sum_x: u64,
    sum_y: u64,
}

impl Component {
    fn new(x: u32, y: u32) -> Self {
        Self {
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0,
            sum_y: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.area += 1;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.sum_x += x as u64;
        self.sum_y += y as u64;
    }

    fn box_width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    fn box_height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    fn squareness(&self) -> f32 {
        let (w, h) = (self.box_width() as f32, self.box_height() as f32);
        w.min(h) / w.max(h)
    }

    fn box_fill(&self) -> f32 {
        self.area as f32 / (self.box_width() * self.box_height()) as f32
    }

    fn centroid(&self) -> (f32, f32) {
        (
            self.sum_x as f32 / self.area as f32,
            self.sum_y as f32 / self.area as f32,
        )
    }
}

/// Find the four corner markers of a sheet in a grayscale photo
///
/// `sheet_to_marker_ratio` is the sheet width divided by the marker side; the
/// expected marker size is derived from the image width with it, on the
/// assumption that the sheet fills most of the frame.
pub fn locate(
    gray: &GrayImage,
    sheet_to_marker_ratio: f32,
    params: &MarkerParams,
) -> Result<MarkerSet, ScanError> {
    let (width, height) = gray.dimensions();
    let expected_side = width as f32 / sheet_to_marker_ratio;
    let min_area = (expected_side * MIN_SIDE_FACTOR).powi(2);
    let max_area = (expected_side * MAX_SIDE_FACTOR).powi(2);

    // Every window straddles paper even when centered on a marker.
    let window = params.min_window.max((2.0 * expected_side) as u32) | 1;
    let binary = sauvola(gray, window, params.k);

    let components = label_dark_components(&binary);

    let half_diagonal = ((width as f32).hypot(height as f32)) / 2.0;
    let mut best: [Option<(f32, Component)>; 4] = [None; 4];
    let mut survivors = 0usize;

    for component in components {
        let area = component.area as f32;
        if area < min_area || area > max_area {
            continue;
        }
        if component.squareness() < MIN_SQUARENESS || component.box_fill() < MIN_BOX_FILL {
            continue;
        }
        survivors += 1;

        let (cx, cy) = component.centroid();
        let corner = Corner::of_point(cx, cy, width, height);
        let (ex, ey) = corner.image_point(width, height);
        let corner_distance = (cx - ex).hypot(cy - ey) / half_diagonal;

        // Square and large wins; proximity to the image corner breaks the rest.
        let score = component.squareness() * area * (1.0 - 0.5 * corner_distance);
        let slot = &mut best[corner.index()];
        if slot.map_or(true, |(s, _)| score > s) {
            *slot = Some((score, component));
        }
    }

    tracing::debug!(
        "Marker search: window {}, expected side {:.1}px, {} candidates survived",
        window,
        expected_side,
        survivors
    );

    let missing: Vec<&'static str> = Corner::ALL
        .iter()
        .filter(|c| best[c.index()].is_none())
        .map(|c| c.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ScanError::MarkerNotFound { missing });
    }

    let markers = Corner::ALL.map(|corner| {
        // Presence of every slot was checked above.
        let component = best[corner.index()].map(|(_, c)| c).unwrap_or(Component::new(0, 0));
        Marker {
            corner,
            center: component.centroid(),
            width: component.box_width(),
            height: component.box_height(),
        }
    });

    for marker in &markers {
        tracing::debug!(
            "Marker {} at ({:.1}, {:.1}), {}x{} px",
            marker.corner.as_str(),
            marker.center.0,
            marker.center.1,
            marker.width,
            marker.height
        );
    }

    Ok(MarkerSet { markers })
}

/// Label 8-connected dark regions of a binarized image
fn label_dark_components(binary: &GrayImage) -> Vec<Component> {
    let labels = connected_components(binary, Connectivity::Eight, Luma([255u8]));

    let mut components: Vec<Option<Component>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if label >= components.len() {
            components.resize(label + 1, None);
        }
        components[label]
            .get_or_insert_with(|| Component::new(x, y))
            .add(x, y);
    }

    components.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{blank_photo_with_markers, draw_square};

    #[test]
    fn test_locates_four_markers() {
        let (img, truth) = blank_photo_with_markers(800, 1000, 40);
        let set = locate(&img, 17.0, &MarkerParams::default()).unwrap();
        for (marker, expected) in set.markers.iter().zip(truth.iter()) {
            assert!(
                (marker.center.0 - expected.0).abs() < 1.0
                    && (marker.center.1 - expected.1).abs() < 1.0,
                "{:?} expected near {:?}",
                marker,
                expected
            );
        }
        assert_eq!(set.markers[0].corner, Corner::TopLeft);
        assert_eq!(set.markers[2].corner, Corner::BottomRight);
    }

    #[test]
    fn test_missing_marker_is_reported_by_quadrant() {
        let (mut img, truth) = blank_photo_with_markers(800, 1000, 40);
        // Paint over the bottom-right marker
        draw_square(&mut img, truth[2], 60, 240);
        let err = locate(&img, 17.0, &MarkerParams::default()).unwrap_err();
        match err {
            ScanError::MarkerNotFound { missing } => assert_eq!(missing, vec!["bottom-right"]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_blank_page_reports_all_quadrants() {
        let img = GrayImage::from_pixel(600, 800, Luma([230]));
        let err = locate(&img, 17.0, &MarkerParams::default()).unwrap_err();
        match err {
            ScanError::MarkerNotFound { missing } => assert_eq!(missing.len(), 4),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_small_marks_and_lines_are_ignored() {
        let (mut img, truth) = blank_photo_with_markers(800, 1000, 40);
        // A filled bubble and a long rule in the top-left quadrant
        draw_square(&mut img, (200.0, 200.0), 14, 20);
        for x in 60..380 {
            for y in 300..306 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        let set = locate(&img, 17.0, &MarkerParams::default()).unwrap();
        let tl = set.markers[0].center;
        assert!((tl.0 - truth[0].0).abs() < 1.0 && (tl.1 - truth[0].1).abs() < 1.0);
    }

    #[test]
    fn test_sheet_filling_half_the_frame() {
        // 40px markers where the photo width suggests about 94px
        let (sheet, truth) = blank_photo_with_markers(800, 1000, 40);
        let mut photo = GrayImage::from_pixel(1600, 2000, Luma([235]));
        image::imageops::replace(&mut photo, &sheet, 400, 500);

        let set = locate(&photo, 17.0, &MarkerParams::default()).unwrap();
        for (marker, expected) in set.markers.iter().zip(truth.iter()) {
            let (ex, ey) = (expected.0 + 400.0, expected.1 + 500.0);
            assert!(
                (marker.center.0 - ex).abs() < 1.0 && (marker.center.1 - ey).abs() < 1.0,
                "{:?} expected near ({}, {})",
                marker,
                ex,
                ey
            );
        }
    }

    #[test]
    fn test_prefers_square_candidate_in_quadrant() {
        let (mut img, truth) = blank_photo_with_markers(800, 1000, 40);
        // An elongated dark blob of similar area near the top-left marker
        for x in 150..210 {
            for y in 120..150 {
                img.put_pixel(x, y, Luma([10]));
            }
        }
        let set = locate(&img, 17.0, &MarkerParams::default()).unwrap();
        let tl = set.markers[0].center;
        assert!((tl.0 - truth[0].0).abs() < 1.0 && (tl.1 - truth[0].1).abs() < 1.0);
    }
}
