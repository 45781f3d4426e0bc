//! Synthetic answer sheets for unit tests

use crate::template::config::{FieldBlockConfig, FieldBlocks, TemplateConfig};
use crate::template::Template;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::rect::Rect;
use std::collections::HashMap;
use std::io::Cursor;

pub const PAPER: u8 = 245;
pub const MARKER_INK: u8 = 15;
pub const OUTLINE: u8 = 150;
pub const BACKGROUND: u8 = 60;

/// Two MCQ4 columns of ten questions on a 500x700 page, marker side 50
pub fn small_template_config() -> TemplateConfig {
    let column = |first: usize, x: f64| FieldBlockConfig {
        field_type: Some("QTYPE_MCQ4".to_string()),
        bubble_values: Vec::new(),
        direction: None,
        field_labels: (first..first + 10).map(|i| format!("q{}", i)).collect(),
        origin: [x, 100.0],
        bubbles_gap: 40.0,
        labels_gap: 45.0,
        bubble_dimensions: None,
    };

    let field_blocks = FieldBlocks::from_iter([("Left", column(1, 60.0)), ("Right", column(11, 270.0))]);

    TemplateConfig {
        page_dimensions: [500, 700],
        bubble_dimensions: [30, 30],
        field_blocks,
        output_columns: (1..=20).map(|i| format!("q{}", i)).collect(),
        empty_value: String::new(),
        sheet_to_marker_width_ratio: 10.0,
    }
}

/// Which choices are penciled in, and how dark
#[derive(Debug, Clone)]
pub struct SheetMarks {
    marks: HashMap<String, Vec<String>>,
    ink: u8,
}

impl SheetMarks {
    pub fn new() -> Self {
        Self {
            marks: HashMap::new(),
            ink: 25,
        }
    }

    pub fn mark(mut self, question: &str, choices: &[&str]) -> Self {
        self.marks.insert(
            question.to_string(),
            choices.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn with_ink(mut self, ink: u8) -> Self {
        self.ink = ink;
        self
    }

    fn is_marked(&self, question: &str, choice: &str) -> bool {
        self.marks
            .get(question)
            .is_some_and(|c| c.iter().any(|m| m == choice))
    }
}

/// A sheet already in canonical page space: markers centered on the page
/// corners, so only a quarter of each is visible
pub fn render_sheet(template: &Template, marks: &SheetMarks) -> GrayImage {
    let mut page = GrayImage::from_pixel(template.page.width, template.page.height, Luma([PAPER]));
    draw_sheet(&mut page, 0, template, marks);
    page
}

/// The printed sheet with a white border around the page, markers whole
pub fn render_physical_sheet(template: &Template, marks: &SheetMarks) -> (GrayImage, u32) {
    let margin = template.marker_side().round() as u32;
    let mut canvas = GrayImage::from_pixel(
        template.page.width + 2 * margin,
        template.page.height + 2 * margin,
        Luma([PAPER]),
    );
    draw_sheet(&mut canvas, margin as i32, template, marks);
    (canvas, margin)
}

fn draw_sheet(canvas: &mut GrayImage, offset: i32, template: &Template, marks: &SheetMarks) {
    let side = template.marker_side();
    let (w, h) = (template.page.width as f32 - 1.0, template.page.height as f32 - 1.0);
    for (cx, cy) in [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)] {
        draw_square(
            canvas,
            (cx + offset as f32, cy + offset as f32),
            side.round() as u32,
            MARKER_INK,
        );
    }

    for block in &template.blocks {
        let radius = block.bubble.width.min(block.bubble.height) as f32;
        for (qi, question) in block.questions.iter().enumerate() {
            for (ci, choice) in block.choices.iter().enumerate() {
                let [x, y] = block.cell_origin(qi, ci);
                let center = (
                    (x.round() as f32 + block.bubble.width as f32 / 2.0).round() as i32 + offset,
                    (y.round() as f32 + block.bubble.height as f32 / 2.0).round() as i32 + offset,
                );
                draw_hollow_circle_mut(canvas, center, (radius * 0.45) as i32, Luma([OUTLINE]));
                if marks.is_marked(question, choice) {
                    draw_filled_circle_mut(canvas, center, (radius * 0.4) as i32, Luma([marks.ink]));
                }
            }
        }
    }
}

/// Fill a `side` x `side` square centered on `center`
pub fn draw_square(img: &mut GrayImage, center: (f32, f32), side: u32, value: u8) {
    let x0 = (center.0 - side as f32 / 2.0).round() as i32;
    let y0 = (center.1 - side as f32 / 2.0).round() as i32;
    draw_filled_rect_mut(img, Rect::at(x0, y0).of_size(side, side), Luma([value]));
}

/// A light page with four `side`-pixel markers inset from the corners, and
/// the marker centroids in clockwise order from top-left
pub fn blank_photo_with_markers(width: u32, height: u32, side: u32) -> (GrayImage, [(f32, f32); 4]) {
    let mut img = GrayImage::from_pixel(width, height, Luma([235]));
    let inset = 30 + side / 2;
    let (l, t) = (inset as f32, inset as f32);
    let (r, b) = ((width - inset) as f32, (height - inset) as f32);
    let centers = [(l, t), (r, t), (r, b), (l, b)];

    let mut truth = [(0.0, 0.0); 4];
    for (i, center) in centers.into_iter().enumerate() {
        draw_square(&mut img, center, side, 20);
        let x0 = (center.0 - side as f32 / 2.0).round();
        let y0 = (center.1 - side as f32 / 2.0).round();
        truth[i] = (x0 + (side as f32 - 1.0) / 2.0, y0 + (side as f32 - 1.0) / 2.0);
    }
    (img, truth)
}

/// Place `sheet` into a `width` x `height` photo with its corners at `quad`
/// (clockwise from top-left) over a dark table, then darken the right side
/// as if lit from the left
pub fn photograph(sheet: &GrayImage, width: u32, height: u32, quad: [(f32, f32); 4]) -> GrayImage {
    let (sw, sh) = (sheet.width() as f32, sheet.height() as f32);
    let from = [(0.0, 0.0), (sw, 0.0), (sw, sh), (0.0, sh)];
    let projection = Projection::from_control_points(from, quad).unwrap();

    let mut photo = GrayImage::new(width, height);
    warp_into(
        sheet,
        &projection,
        Interpolation::Bilinear,
        Luma([BACKGROUND]),
        &mut photo,
    );

    for (x, _, pixel) in photo.enumerate_pixels_mut() {
        let shade = 1.0 - 0.3 * x as f32 / width as f32;
        pixel.0[0] = (pixel.0[0] as f32 * shade).round() as u8;
    }
    photo
}

/// A slightly rotated, keystoned photo of a template's sheet
pub fn photo_of(template: &Template, marks: &SheetMarks) -> GrayImage {
    let (sheet, _) = render_physical_sheet(template, marks);
    let (sw, sh) = (sheet.width() as f32, sheet.height() as f32);
    // About half scale, tilted a few degrees, top edge narrower than bottom
    let scale = 0.5;
    let (w, h) = (sw * scale, sh * scale);
    let quad = [
        (0.08 * w + 0.04 * w, 0.05 * h),
        (1.04 * w, 0.05 * h + 0.05 * w),
        (1.08 * w, 1.03 * h),
        (0.06 * w, 1.03 * h - 0.05 * w),
    ];
    photograph(&sheet, (1.16 * w) as u32, (1.1 * h) as u32, quad)
}

pub fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_template_is_valid() {
        let template = Template::from_config("t", &small_template_config()).unwrap();
        assert_eq!(template.question_count(), 20);
        assert_eq!(template.marker_side(), 50.0);
    }

    #[test]
    fn test_render_sheet_marks_cells() {
        let template = Template::from_config("t", &small_template_config()).unwrap();
        let sheet = render_sheet(&template, &SheetMarks::new().mark("q1", &["A"]));
        // Center of q1/A: origin (60, 100) plus half a bubble
        assert_eq!(sheet.get_pixel(75, 115).0[0], 25);
        assert_eq!(sheet.get_pixel(115, 115).0[0], PAPER);
        // Quarter marker in the top-left corner
        assert_eq!(sheet.get_pixel(5, 5).0[0], MARKER_INK);
    }
}
