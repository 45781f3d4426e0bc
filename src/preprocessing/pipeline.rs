use crate::error::ScanError;
use image::GrayImage;
use serde::Serialize;
use std::time::Instant;

use super::decode::ScanImage;
use super::steps;

/// Preprocessing preset names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    /// Grayscale only, for clean flatbed scans already at template resolution
    Minimal,
    /// Default balanced processing
    /// Steps: grayscale, resize, normalize
    #[default]
    Default,
    /// For noisy low-light phone photos
    /// Steps: grayscale, resize, denoise, normalize
    Aggressive,
}

impl Preset {
    /// Parse from request parameter string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minimal" => Some(Self::Minimal),
            "default" => Some(Self::Default),
            "aggressive" => Some(Self::Aggressive),
            _ => None,
        }
    }

    /// Get the preset name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Default => "default",
            Self::Aggressive => "aggressive",
        }
    }

    pub fn all() -> [Preset; 3] {
        [Self::Minimal, Self::Default, Self::Aggressive]
    }
}

/// Timing information for a single processing step
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub name: String,
    pub time_ms: u64,
}

/// Result of preprocessing including timing stats
#[derive(Debug, Clone)]
pub struct PreprocessingResult {
    /// Grayscale working copy
    pub image: GrayImage,
    /// Individual step timings
    pub steps: Vec<StepTiming>,
}

/// Preprocessing pipeline that applies steps based on preset
pub struct Pipeline {
    preset: Preset,
    max_dimension: u32,
}

impl Pipeline {
    pub fn new(preset: Preset, max_dimension: u32) -> Self {
        Self {
            preset,
            max_dimension,
        }
    }

    /// Produce the grayscale working copy of a decoded photo
    pub fn process(&self, scan: &ScanImage) -> Result<PreprocessingResult, ScanError> {
        let mut steps_timing = Vec::new();

        // All presets do grayscale
        let mut img = run_step("grayscale", &mut steps_timing, || {
            steps::grayscale::apply(&scan.image)
        })?;

        if self.preset == Preset::Minimal {
            return Ok(PreprocessingResult {
                image: img,
                steps: steps_timing,
            });
        }

        // Default and Aggressive: bound the working resolution
        let max_dimension = self.max_dimension;
        img = run_step("resize", &mut steps_timing, || {
            steps::resize::apply(img, max_dimension)
        })?;

        // Aggressive only: denoise before normalize
        if self.preset == Preset::Aggressive {
            img = run_step("denoise", &mut steps_timing, || steps::denoise::apply(img))?;
        }

        // Default and Aggressive: normalize contrast
        img = run_step("normalize", &mut steps_timing, || steps::normalize::apply(img))?;

        Ok(PreprocessingResult {
            image: img,
            steps: steps_timing,
        })
    }
}

/// Run one named step and record how long it took
pub fn run_step<T, F>(name: &str, timings: &mut Vec<StepTiming>, step_fn: F) -> Result<T, ScanError>
where
    F: FnOnce() -> Result<T, ScanError>,
{
    let step_start = Instant::now();
    let result = step_fn()?;
    timings.push(StepTiming {
        name: name.to_string(),
        time_ms: step_start.elapsed().as_millis() as u64,
    });
    Ok(result)
}
