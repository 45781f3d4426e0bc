//! Sheet reading stages
//!
//! Each stage takes the previous stage's output and is stateless per call;
//! [`crate::engine::ScanEngine`] runs them in order.

pub mod aggregate;
pub mod annotate;
pub mod classify;
pub mod grid;
pub mod markers;
pub mod rectify;
pub mod scoring;

pub use aggregate::{DetectionResult, MarkOutcome};
pub use grid::{CellGrid, GridCache};
pub use scoring::{AnswerKey, MarkingScheme, QuestionStatus, ScoreResult};
