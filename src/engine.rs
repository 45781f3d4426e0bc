use crate::config::EngineSettings;
use crate::error::ScanError;
use crate::omr::classify::{self, Classification};
use crate::omr::{aggregate, annotate, grid, markers, rectify, scoring};
use crate::omr::{AnswerKey, DetectionResult, GridCache, MarkingScheme, ScoreResult};
use crate::preprocessing::{self, run_step, Pipeline, Preset, StepTiming};
use crate::template::Template;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// One sheet to read
pub struct ScanRequest<'a> {
    pub image: &'a [u8],
    pub template: &'a Template,
    pub answer_key: Option<&'a AnswerKey>,
    pub marking_scheme: Option<&'a MarkingScheme>,
    /// Falls back to the engine's default preset
    pub preset: Option<Preset>,
    /// Keep the laid out grid for later scans of the same template
    pub cache_grid: bool,
}

/// What was uploaded, as decoded
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub reoriented: bool,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub template_id: String,
    pub detection: DetectionResult,
    pub score: ScoreResult,
    pub classification: Classification,
    pub annotated_png: Option<Vec<u8>>,
    pub image: ImageInfo,
    pub preset: Preset,
    pub steps: Vec<StepTiming>,
    pub total_time_ms: u64,
}

/// Runs the sheet reading stages in order
///
/// Holds only tuning and the grid cache; every scan is independent, so one
/// engine is shared by all requests.
pub struct ScanEngine {
    settings: EngineSettings,
    grids: GridCache,
}

impl ScanEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            grids: GridCache::new(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cached_grids(&self) -> usize {
        self.grids.len()
    }

    pub fn scan(&self, request: ScanRequest<'_>) -> Result<ScanOutcome, ScanError> {
        let start = Instant::now();
        let template = request.template;
        let preset = request.preset.unwrap_or(self.settings.default_preset);
        let mut steps = Vec::new();

        let scan = run_step("decode", &mut steps, || preprocessing::decode(request.image))?;
        let image = ImageInfo {
            format: scan.format_name().to_string(),
            width: scan.width(),
            height: scan.height(),
            reoriented: scan.reoriented,
        };

        let preprocessed = Pipeline::new(preset, self.settings.max_dimension).process(&scan)?;
        steps.extend(preprocessed.steps);
        let gray = preprocessed.image;
        drop(scan);

        let marker_set = run_step("markers", &mut steps, || {
            markers::locate(&gray, template.sheet_to_marker_ratio, &self.settings.markers)
        })?;

        let rectified = run_step("rectify", &mut steps, || {
            rectify::rectify(&gray, marker_set.centers(), template.page)
        })?;
        tracing::trace!("Photo to page homography: {:?}", rectified.homography);
        let sheet = rectified.image;

        let grid = run_step("grid", &mut steps, || {
            if request.cache_grid {
                self.grids.get_or_sample(template)
            } else {
                grid::sample(template).map(Arc::new)
            }
        })?;

        let classification = run_step("classify", &mut steps, || {
            Ok(classify::classify(
                &sheet,
                &grid,
                template.marker_side(),
                &self.settings.classifier,
            ))
        })?;

        let detection = run_step("aggregate", &mut steps, || {
            Ok(aggregate::aggregate(&classification))
        })?;

        let score = run_step("score", &mut steps, || {
            Ok(scoring::score(
                &detection,
                request.answer_key,
                request.marking_scheme,
            ))
        })?;

        let annotated_png = if self.settings.annotate {
            Some(run_step("annotate", &mut steps, || {
                annotate::annotate(&sheet, &grid, &detection, &score)
            })?)
        } else {
            None
        };

        let total_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Scanned {} sheet ({}x{} {}) in {}ms: {} single, {} unmarked, {} multi-marked{}",
            template.id,
            image.width,
            image.height,
            image.format,
            total_time_ms,
            detection.single_count(),
            detection.unmarked_count,
            detection.multi_marked_count,
            match (score.score, score.total) {
                (Some(s), Some(t)) => format!(", score {}/{}", s, t),
                _ => String::new(),
            }
        );

        Ok(ScanOutcome {
            template_id: template.id.clone(),
            detection,
            score,
            classification,
            annotated_png,
            image,
            preset,
            steps,
            total_time_ms,
        })
    }
}
