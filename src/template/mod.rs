//! Sheet templates
//!
//! A [`Template`] is the validated form of a [`TemplateConfig`]. All geometric
//! invariants (cells inside the page, no overlapping blocks, unique question
//! ids) are checked once in [`Template::from_config`], so the scan pipeline
//! never has to re-check them.

pub mod config;
pub mod registry;

pub use config::{default_template_config, FieldBlocks, TemplateConfig};
pub use registry::TemplateRegistry;

use crate::error::ScanError;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Width/height pair in canonical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl From<[u32; 2]> for Dimensions {
    fn from(d: [u32; 2]) -> Self {
        Self {
            width: d[0],
            height: d[1],
        }
    }
}

/// Axis along which the choices of one question are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Choices advance along x, questions along y
    Horizontal,
    /// Choices advance along y, questions along x
    Vertical,
}

impl Direction {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "horizontal" => Some(Self::Horizontal),
            "vertical" => Some(Self::Vertical),
            _ => None,
        }
    }
}

/// A named rectangular group of bubbles sharing one geometry
#[derive(Debug, Clone, Serialize)]
pub struct FieldBlock {
    pub name: String,
    pub origin: [f64; 2],
    pub direction: Direction,
    pub questions: Vec<String>,
    pub choices: Vec<String>,
    pub choice_gap: f64,
    pub question_gap: f64,
    pub bubble: Dimensions,
}

impl FieldBlock {
    /// Top-left corner of a bubble cell, before rounding
    pub fn cell_origin(&self, question: usize, choice: usize) -> [f64; 2] {
        let along_choice = choice as f64 * self.choice_gap;
        let along_question = question as f64 * self.question_gap;
        match self.direction {
            Direction::Horizontal => [
                self.origin[0] + along_choice,
                self.origin[1] + along_question,
            ],
            Direction::Vertical => [
                self.origin[0] + along_question,
                self.origin[1] + along_choice,
            ],
        }
    }

    /// Bounding box of every cell in the block as `[x0, y0, x1, y1]`
    pub fn bounds(&self) -> [f64; 4] {
        let last = self.cell_origin(self.questions.len() - 1, self.choices.len() - 1);
        [
            self.origin[0],
            self.origin[1],
            last[0] + self.bubble.width as f64,
            last[1] + self.bubble.height as f64,
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub id: String,
    pub page: Dimensions,
    pub bubble: Dimensions,
    pub sheet_to_marker_ratio: f32,
    pub blocks: Vec<FieldBlock>,
    /// Question ids in output order
    pub questions: Vec<String>,
    #[serde(skip)]
    fingerprint: u64,
}

impl Template {
    pub fn from_config(id: &str, config: &TemplateConfig) -> Result<Self, ScanError> {
        let page = Dimensions::from(config.page_dimensions);
        let bubble = Dimensions::from(config.bubble_dimensions);

        if page.width == 0 || page.height == 0 {
            return Err(ScanError::InvalidTemplate(format!(
                "page dimensions must be non-zero, got {}x{}",
                page.width, page.height
            )));
        }
        if !(config.sheet_to_marker_width_ratio.is_finite()
            && config.sheet_to_marker_width_ratio > 1.0)
        {
            return Err(ScanError::InvalidTemplate(format!(
                "sheetToMarkerWidthRatio must be greater than 1, got {}",
                config.sheet_to_marker_width_ratio
            )));
        }
        if config.field_blocks.is_empty() {
            return Err(ScanError::InvalidTemplate(
                "template has no field blocks".to_string(),
            ));
        }

        let mut blocks = Vec::with_capacity(config.field_blocks.len());
        for (name, block_config) in config.field_blocks.iter() {
            blocks.push(build_block(name, block_config, bubble)?);
        }

        let mut seen = HashSet::new();
        let mut block_questions = Vec::new();
        for block in &blocks {
            for question in &block.questions {
                if !seen.insert(question.as_str()) {
                    return Err(ScanError::InvalidTemplate(format!(
                        "question {} appears more than once",
                        question
                    )));
                }
                block_questions.push(question.clone());
            }
        }

        let questions = if config.output_columns.is_empty() {
            block_questions
        } else {
            let mut listed = HashSet::new();
            for column in &config.output_columns {
                if !seen.contains(column.as_str()) {
                    return Err(ScanError::InvalidTemplate(format!(
                        "output column {} is not a question of any field block",
                        column
                    )));
                }
                if !listed.insert(column.as_str()) {
                    return Err(ScanError::InvalidTemplate(format!(
                        "output column {} is listed twice",
                        column
                    )));
                }
            }
            if listed.len() != seen.len() {
                return Err(ScanError::InvalidTemplate(format!(
                    "outputColumns lists {} of {} questions",
                    listed.len(),
                    seen.len()
                )));
            }
            config.output_columns.clone()
        };

        for block in &blocks {
            check_block_fits(block, page)?;
        }
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                if rects_overlap(a.bounds(), b.bounds()) {
                    return Err(ScanError::InvalidTemplate(format!(
                        "field blocks {} and {} overlap",
                        a.name, b.name
                    )));
                }
            }
        }

        let mut template = Self {
            id: id.to_string(),
            page,
            bubble,
            sheet_to_marker_ratio: config.sheet_to_marker_width_ratio,
            blocks,
            questions,
            fingerprint: 0,
        };
        template.fingerprint = template.compute_fingerprint();
        Ok(template)
    }

    /// Identity of the template's geometry, used as the grid cache key
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    /// Side length of a fiducial marker in canonical pixels
    pub fn marker_side(&self) -> f32 {
        self.page.width as f32 / self.sheet_to_marker_ratio
    }

    fn compute_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        self.page.hash(&mut hasher);
        self.sheet_to_marker_ratio.to_bits().hash(&mut hasher);
        for block in &self.blocks {
            block.name.hash(&mut hasher);
            block.origin[0].to_bits().hash(&mut hasher);
            block.origin[1].to_bits().hash(&mut hasher);
            block.direction.hash(&mut hasher);
            block.questions.hash(&mut hasher);
            block.choices.hash(&mut hasher);
            block.choice_gap.to_bits().hash(&mut hasher);
            block.question_gap.to_bits().hash(&mut hasher);
            block.bubble.hash(&mut hasher);
        }
        self.questions.hash(&mut hasher);
        hasher.finish()
    }
}

fn build_block(
    name: &str,
    config: &config::FieldBlockConfig,
    default_bubble: Dimensions,
) -> Result<FieldBlock, ScanError> {
    let invalid = |msg: String| ScanError::InvalidTemplate(format!("field block {}: {}", name, msg));

    // A known field type decides both the choices and the direction.
    let (choices, direction) = match config
        .field_type
        .as_deref()
        .and_then(config::field_type_preset)
    {
        Some((values, direction)) => (
            values.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
            direction.to_string(),
        ),
        None => (
            config.bubble_values.clone(),
            config
                .direction
                .clone()
                .unwrap_or_else(|| "vertical".to_string()),
        ),
    };

    if choices.is_empty() {
        return Err(invalid(match &config.field_type {
            Some(t) => format!("unknown fieldType {} and no bubbleValues", t),
            None => "no bubbleValues".to_string(),
        }));
    }
    let direction = Direction::parse(&direction)
        .ok_or_else(|| invalid(format!("unknown direction {}", direction)))?;

    if config.field_labels.is_empty() {
        return Err(invalid("no fieldLabels".to_string()));
    }
    if config.field_labels.iter().any(|l| l.trim().is_empty()) {
        return Err(invalid("empty field label".to_string()));
    }
    let unique_choices: HashSet<&String> = choices.iter().collect();
    if unique_choices.len() != choices.len() {
        return Err(invalid("duplicate bubble values".to_string()));
    }

    let bubble = config
        .bubble_dimensions
        .map(Dimensions::from)
        .unwrap_or(default_bubble);
    if bubble.width == 0 || bubble.height == 0 {
        return Err(invalid("bubble dimensions must be non-zero".to_string()));
    }

    let gaps_valid = |gap: f64, count: usize, extent: u32| {
        gap.is_finite() && (count == 1 || gap >= extent as f64)
    };
    let (choice_extent, question_extent) = match direction {
        Direction::Horizontal => (bubble.width, bubble.height),
        Direction::Vertical => (bubble.height, bubble.width),
    };
    if !gaps_valid(config.bubbles_gap, choices.len(), choice_extent) {
        return Err(invalid(format!(
            "bubblesGap {} is smaller than the bubble it separates",
            config.bubbles_gap
        )));
    }
    if !gaps_valid(config.labels_gap, config.field_labels.len(), question_extent) {
        return Err(invalid(format!(
            "labelsGap {} is smaller than the bubble it separates",
            config.labels_gap
        )));
    }
    if !(config.origin[0].is_finite() && config.origin[1].is_finite()) {
        return Err(invalid("origin is not finite".to_string()));
    }

    Ok(FieldBlock {
        name: name.to_string(),
        origin: config.origin,
        direction,
        questions: config.field_labels.clone(),
        choices,
        choice_gap: config.bubbles_gap,
        question_gap: config.labels_gap,
        bubble,
    })
}

fn check_block_fits(block: &FieldBlock, page: Dimensions) -> Result<(), ScanError> {
    let [x0, y0, x1, y1] = block.bounds();
    if x0.round() < 0.0
        || y0.round() < 0.0
        || x1.round() > page.width as f64
        || y1.round() > page.height as f64
    {
        return Err(ScanError::TemplateMismatch(format!(
            "field block {} spans ({:.0},{:.0})-({:.0},{:.0}) but the page is {}x{}",
            block.name, x0, y0, x1, y1, page.width, page.height
        )));
    }
    Ok(())
}

fn rects_overlap(a: [f64; 4], b: [f64; 4]) -> bool {
    a[0] < b[2] && b[0] < a[2] && a[1] < b[3] && b[1] < a[3]
}
