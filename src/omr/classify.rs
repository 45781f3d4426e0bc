//! Bubble fill classification
//!
//! Darkness is judged relative to the sheet itself: ink from the corner
//! markers, paper from the neighborhood of each cell. The mark threshold is
//! then calibrated on the sheet's own empty bubbles, so lighting, pencil
//! weight and printer toner shift the baseline rather than the outcome.

use super::grid::{CellGrid, CellRect};
use image::GrayImage;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct ClassifierParams {
    /// How far above the empty baseline a mark must reach
    pub relative_margin: f32,
    /// Floor of the mark threshold
    pub min_fill_ratio: f32,
    /// Ceiling of the mark threshold
    pub max_fill_ratio: f32,
    /// Cells above this ratio never count toward the empty baseline
    pub max_empty_ratio: f32,
    /// Paper minus ink, in gray levels, below which a cell reads as empty
    pub min_contrast: f32,
    /// Radius of the sampled core circle relative to the cell's short side
    pub core_radius_ratio: f32,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            relative_margin: 0.30,
            min_fill_ratio: 0.35,
            max_fill_ratio: 0.75,
            max_empty_ratio: 0.5,
            min_contrast: 30.0,
            core_radius_ratio: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CellReading {
    pub choice: String,
    pub fill_ratio: f32,
    pub filled: bool,
}

#[derive(Debug, Clone)]
pub struct QuestionReading {
    pub question: String,
    pub cells: Vec<CellReading>,
}

impl QuestionReading {
    pub fn filled_choices(&self) -> Vec<String> {
        self.cells
            .iter()
            .filter(|c| c.filled)
            .map(|c| c.choice.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub questions: Vec<QuestionReading>,
    /// Fill ratio a cell needed to count as marked
    pub threshold: f32,
    pub empty_baseline: f32,
    pub ink_level: f32,
}

/// Classify every cell of `grid` on a rectified sheet
///
/// `marker_side` is the marker side in canonical pixels; the markers sit on
/// the page corners, so a quarter of each one lands inside the page.
pub fn classify(
    sheet: &GrayImage,
    grid: &CellGrid,
    marker_side: f32,
    params: &ClassifierParams,
) -> Classification {
    let ink_level = ink_level(sheet, grid, marker_side, params);

    let ratios: Vec<Vec<f32>> = grid
        .questions
        .iter()
        .map(|q| {
            q.cells
                .iter()
                .map(|cell| fill_ratio(sheet, &cell.rect, ink_level, params))
                .collect()
        })
        .collect();

    let all: Vec<f32> = ratios.iter().flatten().copied().collect();
    let empty_baseline = empty_baseline(&all, params.max_empty_ratio);
    let threshold = (empty_baseline + params.relative_margin)
        .max(params.min_fill_ratio)
        .min(params.max_fill_ratio);

    let questions = grid
        .questions
        .iter()
        .zip(ratios)
        .map(|(q, ratios)| QuestionReading {
            question: q.question.clone(),
            cells: q
                .cells
                .iter()
                .zip(ratios)
                .map(|(cell, fill_ratio)| CellReading {
                    choice: cell.choice.clone(),
                    fill_ratio,
                    filled: fill_ratio >= threshold,
                })
                .collect(),
        })
        .collect();

    tracing::debug!(
        "Classified {} cells: ink {:.0}, empty baseline {:.3}, threshold {:.3}",
        all.len(),
        ink_level,
        empty_baseline,
        threshold
    );

    Classification {
        questions,
        threshold,
        empty_baseline,
        ink_level,
    }
}

/// Mean intensity of the marker patches in the page corners
///
/// Falls back to the darkest cell core when the corners are no darker than the
/// paper (markers cropped by the warp, or a sheet printed without them).
fn ink_level(sheet: &GrayImage, grid: &CellGrid, marker_side: f32, params: &ClassifierParams) -> f32 {
    let (width, height) = sheet.dimensions();
    let patch = ((marker_side * 0.4).round() as u32)
        .min(width.min(height) / 2)
        .max(1);

    let mut sum = 0u64;
    let mut count = 0u64;
    for (x0, y0) in [
        (0, 0),
        (width - patch, 0),
        (width - patch, height - patch),
        (0, height - patch),
    ] {
        for y in y0..y0 + patch {
            for x in x0..x0 + patch {
                sum += sheet.get_pixel(x, y).0[0] as u64;
                count += 1;
            }
        }
    }
    let corners = sum as f32 / count as f32;

    let mut page_hist = [0u32; 256];
    for p in sheet.pixels() {
        page_hist[p.0[0] as usize] += 1;
    }
    let paper = percentile(&page_hist, 0.9);

    if paper - corners >= params.min_contrast {
        return corners;
    }

    let darkest = grid
        .questions
        .iter()
        .flat_map(|q| q.cells.iter())
        .map(|cell| core_mean(sheet, &cell.rect, params.core_radius_ratio))
        .fold(f32::MAX, f32::min);
    tracing::debug!(
        "Corner patches ({:.0}) no darker than paper ({:.0}); using darkest cell ({:.0})",
        corners,
        paper,
        darkest
    );
    darkest.min(corners)
}

/// Fraction of the cell's core circle darker than the local midpoint between
/// ink and paper
fn fill_ratio(sheet: &GrayImage, rect: &CellRect, ink: f32, params: &ClassifierParams) -> f32 {
    let paper = local_paper_level(sheet, rect);
    if paper - ink < params.min_contrast {
        return 0.0;
    }
    let cutoff = ink + 0.5 * (paper - ink);

    let mut dark = 0u32;
    let mut total = 0u32;
    for_each_core_pixel(sheet, rect, params.core_radius_ratio, |v| {
        total += 1;
        if (v as f32) < cutoff {
            dark += 1;
        }
    });
    if total == 0 {
        return 0.0;
    }
    dark as f32 / total as f32
}

/// 90th percentile intensity of the cell and half a cell around it
fn local_paper_level(sheet: &GrayImage, rect: &CellRect) -> f32 {
    let (width, height) = sheet.dimensions();
    let pad = rect.width.max(rect.height) / 2;
    let x0 = rect.x.saturating_sub(pad);
    let y0 = rect.y.saturating_sub(pad);
    let x1 = (rect.x + rect.width + pad).min(width);
    let y1 = (rect.y + rect.height + pad).min(height);

    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[sheet.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    percentile(&hist, 0.9)
}

fn core_mean(sheet: &GrayImage, rect: &CellRect, radius_ratio: f32) -> f32 {
    let mut sum = 0u64;
    let mut total = 0u64;
    for_each_core_pixel(sheet, rect, radius_ratio, |v| {
        sum += v as u64;
        total += 1;
    });
    if total == 0 {
        return 255.0;
    }
    sum as f32 / total as f32
}

fn for_each_core_pixel<F: FnMut(u8)>(sheet: &GrayImage, rect: &CellRect, radius_ratio: f32, mut f: F) {
    let (width, height) = sheet.dimensions();
    let (cx, cy) = rect.center();
    let radius = radius_ratio * rect.width.min(rect.height) as f32;
    let r2 = radius * radius;

    let x_end = (rect.x + rect.width).min(width);
    let y_end = (rect.y + rect.height).min(height);
    for y in rect.y..y_end {
        let dy = y as f32 + 0.5 - cy;
        for x in rect.x..x_end {
            let dx = x as f32 + 0.5 - cx;
            if dx * dx + dy * dy <= r2 {
                f(sheet.get_pixel(x, y).0[0]);
            }
        }
    }
}

/// Smallest gray level with at least fraction `p` of the histogram at or
/// below it
fn percentile(hist: &[u32; 256], p: f32) -> f32 {
    let total: u64 = hist.iter().map(|&c| c as u64).sum();
    if total == 0 {
        return 255.0;
    }
    let target = ((total as f64) * p as f64).ceil().max(1.0) as u64;
    let mut cumulative = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        cumulative += count as u64;
        if cumulative >= target {
            return value as f32;
        }
    }
    255.0
}

/// Median of the ratios that look empty, or of all ratios when none do
fn empty_baseline(ratios: &[f32], max_empty_ratio: f32) -> f32 {
    let mut candidates: Vec<f32> = ratios
        .iter()
        .copied()
        .filter(|&r| r < max_empty_ratio)
        .collect();
    if candidates.is_empty() {
        candidates = ratios.to_vec();
    }
    if candidates.is_empty() {
        return 0.0;
    }
    candidates.sort_by(|a, b| a.total_cmp(b));
    let mid = candidates.len() / 2;
    if candidates.len() % 2 == 0 {
        (candidates[mid - 1] + candidates[mid]) / 2.0
    } else {
        candidates[mid]
    }
}
