//! Bubble cell geometry
//!
//! Pure function of the template: where every (question, choice) cell sits on
//! the canonical page. Grids are cached per template fingerprint since the
//! same few templates are scanned over and over.

use crate::error::ScanError;
use crate::template::Template;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Pixel rectangle of one bubble cell in canonical space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CellRect {
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Cell {
    pub choice: String,
    pub rect: CellRect,
}

#[derive(Debug, Clone)]
pub struct QuestionCells {
    pub question: String,
    pub block: String,
    pub cells: Vec<Cell>,
}

/// Every bubble cell of a template, questions in output order
#[derive(Debug, Clone)]
pub struct CellGrid {
    pub questions: Vec<QuestionCells>,
}

impl CellGrid {
    pub fn cell_count(&self) -> usize {
        self.questions.iter().map(|q| q.cells.len()).sum()
    }
}

/// Lay out the cell grid of a template
pub fn sample(template: &Template) -> Result<CellGrid, ScanError> {
    let page = template.page;
    let mut by_question: HashMap<&str, QuestionCells> = HashMap::new();

    for block in &template.blocks {
        for (qi, question) in block.questions.iter().enumerate() {
            let mut cells = Vec::with_capacity(block.choices.len());
            for (ci, choice) in block.choices.iter().enumerate() {
                let [x, y] = block.cell_origin(qi, ci);
                let (x, y) = (x.round(), y.round());
                if x < 0.0
                    || y < 0.0
                    || x + block.bubble.width as f64 > page.width as f64
                    || y + block.bubble.height as f64 > page.height as f64
                {
                    return Err(ScanError::TemplateMismatch(format!(
                        "cell {}/{} at ({}, {}) leaves the {}x{} page",
                        question, choice, x, y, page.width, page.height
                    )));
                }
                cells.push(Cell {
                    choice: choice.clone(),
                    rect: CellRect {
                        x: x as u32,
                        y: y as u32,
                        width: block.bubble.width,
                        height: block.bubble.height,
                    },
                });
            }
            by_question.insert(
                question.as_str(),
                QuestionCells {
                    question: question.clone(),
                    block: block.name.clone(),
                    cells,
                },
            );
        }
    }

    let mut questions = Vec::with_capacity(template.questions.len());
    for question in &template.questions {
        let cells = by_question.remove(question.as_str()).ok_or_else(|| {
            ScanError::InvalidTemplate(format!("output column {} has no cells", question))
        })?;
        questions.push(cells);
    }

    Ok(CellGrid { questions })
}

/// Cell grids keyed by template fingerprint
#[derive(Debug, Default)]
pub struct GridCache {
    grids: RwLock<HashMap<u64, Arc<CellGrid>>>,
}

impl GridCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached grid for `template`, laying it out on first use
    pub fn get_or_sample(&self, template: &Template) -> Result<Arc<CellGrid>, ScanError> {
        let key = template.fingerprint();
        {
            let grids = self
                .grids
                .read()
                .map_err(|_| ScanError::Internal("grid cache lock poisoned".to_string()))?;
            if let Some(grid) = grids.get(&key) {
                return Ok(Arc::clone(grid));
            }
        }

        let grid = Arc::new(sample(template)?);
        tracing::debug!(
            "Laid out {} cells for template {}",
            grid.cell_count(),
            template.id
        );

        let mut grids = self
            .grids
            .write()
            .map_err(|_| ScanError::Internal("grid cache lock poisoned".to_string()))?;
        // Another request may have laid out the same template meanwhile.
        Ok(Arc::clone(grids.entry(key).or_insert(grid)))
    }

    pub fn len(&self) -> usize {
        self.grids.read().map(|g| g.len()).unwrap_or(0)
    }
}
