//! Per-question outcomes
//!
//! Reduces per-cell readings to one tri-state outcome per question, in
//! template output order, and tallies the questions that need attention.

use super::classify::{CellReading, Classification};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Single(String),
    Unmarked,
    MultiMarked(Vec<String>),
}

impl MarkOutcome {
    /// Value reported for the question: the choice, `unmarked` or
    /// `multi-marked`
    pub fn label(&self) -> &str {
        match self {
            MarkOutcome::Single(choice) => choice,
            MarkOutcome::Unmarked => "unmarked",
            MarkOutcome::MultiMarked(_) => "multi-marked",
        }
    }

    /// Choices that were read as filled
    pub fn marked_choices(&self) -> &[String] {
        match self {
            MarkOutcome::Single(choice) => std::slice::from_ref(choice),
            MarkOutcome::Unmarked => &[],
            MarkOutcome::MultiMarked(choices) => choices,
        }
    }

    fn from_choices(mut choices: Vec<String>) -> Self {
        match choices.len() {
            0 => MarkOutcome::Unmarked,
            1 => MarkOutcome::Single(choices.remove(0)),
            _ => MarkOutcome::MultiMarked(choices),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectedAnswer {
    pub question: String,
    pub outcome: MarkOutcome,
    /// Per-choice readings the outcome was decided from
    pub bubbles: Vec<CellReading>,
}

#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// One entry per template question, in output order
    pub answers: Vec<DetectedAnswer>,
    pub unmarked_count: usize,
    pub multi_marked_count: usize,
}

impl DetectionResult {
    pub fn get(&self, question: &str) -> Option<&MarkOutcome> {
        self.answer(question).map(|a| &a.outcome)
    }

    pub fn answer(&self, question: &str) -> Option<&DetectedAnswer> {
        self.answers.iter().find(|a| a.question == question)
    }

    pub fn single_count(&self) -> usize {
        self.answers.len() - self.unmarked_count - self.multi_marked_count
    }

    /// Choices of each multi-marked question, in output order
    pub fn multi_marked_choices(&self) -> MultiMarkedChoices<'_> {
        MultiMarkedChoices(self)
    }
}

/// Serializes as an ordered `{question: label}` map
impl Serialize for DetectionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.answers.len()))?;
        for answer in &self.answers {
            map.serialize_entry(&answer.question, answer.outcome.label())?;
        }
        map.end()
    }
}

/// Ordered `{question: [choices]}` view over the multi-marked questions
pub struct MultiMarkedChoices<'a>(&'a DetectionResult);

impl Serialize for MultiMarkedChoices<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.multi_marked_count))?;
        for answer in &self.0.answers {
            if let MarkOutcome::MultiMarked(choices) = &answer.outcome {
                map.serialize_entry(&answer.question, choices)?;
            }
        }
        map.end()
    }
}

pub fn aggregate(classification: &Classification) -> DetectionResult {
    let mut unmarked_count = 0;
    let mut multi_marked_count = 0;

    let answers: Vec<DetectedAnswer> = classification
        .questions
        .iter()
        .map(|reading| {
            let outcome = MarkOutcome::from_choices(reading.filled_choices());
            match outcome {
                MarkOutcome::Unmarked => unmarked_count += 1,
                MarkOutcome::MultiMarked(_) => multi_marked_count += 1,
                MarkOutcome::Single(_) => {}
            }
            DetectedAnswer {
                question: reading.question.clone(),
                outcome,
                bubbles: reading.cells.clone(),
            }
        })
        .collect();

    DetectionResult {
        answers,
        unmarked_count,
        multi_marked_count,
    }
}
