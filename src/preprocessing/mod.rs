//! Image preprocessing for sheet photos
//!
//! Decodes uploaded bytes and produces the grayscale working copy the rest of
//! the scan pipeline reads, through a preset-driven list of steps.

pub mod decode;
pub mod pipeline;
pub mod steps;

pub use decode::{decode, ScanImage};
pub use pipeline::{run_step, Pipeline, Preset, StepTiming};
