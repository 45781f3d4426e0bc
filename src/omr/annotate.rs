//! Overlay of detected marks on the rectified sheet

use super::aggregate::{DetectionResult, MarkOutcome};
use super::grid::{CellGrid, CellRect};
use super::scoring::{QuestionStatus, ScoreResult};
use crate::error::ScanError;
use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::io::Cursor;

pub const CORRECT: Rgb<u8> = Rgb([0, 170, 60]);
pub const INCORRECT: Rgb<u8> = Rgb([220, 30, 30]);
pub const ATTENTION: Rgb<u8> = Rgb([245, 165, 0]);
pub const UNSCORED: Rgb<u8> = Rgb([30, 90, 230]);
pub const EMPTY: Rgb<u8> = Rgb([200, 200, 200]);

/// Draw the scan result over an RGB copy of the rectified sheet
pub fn render(
    sheet: &GrayImage,
    grid: &CellGrid,
    detection: &DetectionResult,
    score: &ScoreResult,
) -> RgbImage {
    let mut canvas = DynamicImage::ImageLuma8(sheet.clone()).to_rgb8();

    for question in &grid.questions {
        let outcome = detection
            .get(&question.question)
            .unwrap_or(&MarkOutcome::Unmarked);
        let detail = score.detail(&question.question);
        let status = detail.map_or(QuestionStatus::Unscored, |d| d.status);
        let key_choice = detail.and_then(|d| d.correct.as_deref());

        for cell in &question.cells {
            let marked = outcome.marked_choices().contains(&cell.choice);
            let (color, thickness) = match (marked, status, outcome) {
                (true, QuestionStatus::Correct, _) => (CORRECT, 3),
                (true, QuestionStatus::Incorrect, _) => (INCORRECT, 3),
                (true, _, MarkOutcome::MultiMarked(_)) => (ATTENTION, 3),
                (true, _, _) => (UNSCORED, 3),
                (false, _, MarkOutcome::Unmarked) => (ATTENTION, 2),
                (false, _, _) => (EMPTY, 1),
            };
            outline(&mut canvas, &cell.rect, 0, thickness, color);

            let is_key = key_choice.is_some_and(|k| k.trim().eq_ignore_ascii_case(&cell.choice));
            if is_key && status != QuestionStatus::Correct {
                outline(&mut canvas, &cell.rect, 4, 1, CORRECT);
            }
        }
    }

    canvas
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ScanError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ScanError::Internal(format!("failed to encode annotated image: {}", e)))?;
    Ok(buf)
}

/// Render and encode in one go
pub fn annotate(
    sheet: &GrayImage,
    grid: &CellGrid,
    detection: &DetectionResult,
    score: &ScoreResult,
) -> Result<Vec<u8>, ScanError> {
    encode_png(&render(sheet, grid, detection, score))
}

/// Nested hollow rectangles starting `offset` pixels outside the cell
fn outline(canvas: &mut RgbImage, rect: &CellRect, offset: i32, thickness: i32, color: Rgb<u8>) {
    for i in 0..thickness {
        let grow = offset - i;
        let width = rect.width as i32 + 2 * grow;
        let height = rect.height as i32 + 2 * grow;
        if width <= 0 || height <= 0 {
            break;
        }
        let r = Rect::at(rect.x as i32 - grow, rect.y as i32 - grow).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(canvas, r, color);
    }
}
