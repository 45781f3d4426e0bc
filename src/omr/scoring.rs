//! Scoring detected answers against an answer key

use super::aggregate::{DetectedAnswer, DetectionResult, MarkOutcome};
use super::classify::CellReading;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Points awarded per question outcome; negatives allowed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkingScheme {
    pub correct: f64,
    pub incorrect: f64,
    pub unmarked: f64,
}

impl Default for MarkingScheme {
    fn default() -> Self {
        Self {
            correct: 1.0,
            incorrect: 0.0,
            unmarked: 0.0,
        }
    }
}

impl MarkingScheme {
    fn min_points(&self) -> f64 {
        self.correct.min(self.incorrect).min(self.unmarked)
    }

    fn max_points(&self) -> f64 {
        self.correct.max(self.incorrect).max(self.unmarked)
    }
}

/// Question id to correct choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerKey(pub BTreeMap<String, String>);

impl AnswerKey {
    /// Keyed questions; blank answers leave a question unscored
    fn entries(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter().filter(|(_, answer)| !answer.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AnswerKey {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Correct,
    Incorrect,
    Unmarked,
    Unscored,
}

#[derive(Debug, Clone, Serialize)]
pub struct BubbleDetail {
    pub question: String,
    pub marked: String,
    pub correct: Option<String>,
    pub is_correct: Option<bool>,
    pub status: QuestionStatus,
    /// Fill ratio of every choice, empty for keyed ids the sheet lacks
    pub bubbles: Vec<CellReading>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub score: Option<f64>,
    pub total: Option<usize>,
    pub percentage: Option<f64>,
    pub bubble_details: Vec<BubbleDetail>,
    pub multi_marked_count: usize,
    pub unmarked_count: usize,
}

impl ScoreResult {
    pub fn detail(&self, question: &str) -> Option<&BubbleDetail> {
        self.bubble_details.iter().find(|d| d.question == question)
    }
}

/// Score a detection against an optional key
///
/// Without a key every question is reported `unscored` and the score fields
/// stay empty. With one, keyed questions come first in numeric order, followed
/// by the template's unkeyed questions.
pub fn score(
    detection: &DetectionResult,
    key: Option<&AnswerKey>,
    scheme: Option<&MarkingScheme>,
) -> ScoreResult {
    let key = match key.filter(|k| !k.is_empty()) {
        Some(key) => key,
        None => {
            return ScoreResult {
                score: None,
                total: None,
                percentage: None,
                bubble_details: detection
                    .answers
                    .iter()
                    .map(unscored)
                    .collect(),
                multi_marked_count: detection.multi_marked_count,
                unmarked_count: detection.unmarked_count,
            };
        }
    };
    let scheme = scheme.copied().unwrap_or_default();

    let mut points = 0.0;
    let mut details = Vec::with_capacity(detection.answers.len());
    for (question, answer) in key.entries() {
        let detected = detection.answer(question);
        let outcome = detected.map_or(&MarkOutcome::Unmarked, |a| &a.outcome);
        let (status, is_correct) = match outcome {
            MarkOutcome::Unmarked => (QuestionStatus::Unmarked, None),
            MarkOutcome::Single(choice) if choice.eq_ignore_ascii_case(answer.trim()) => {
                (QuestionStatus::Correct, Some(true))
            }
            MarkOutcome::Single(_) | MarkOutcome::MultiMarked(_) => {
                (QuestionStatus::Incorrect, Some(false))
            }
        };
        points += match status {
            QuestionStatus::Correct => scheme.correct,
            QuestionStatus::Incorrect => scheme.incorrect,
            _ => scheme.unmarked,
        };
        details.push(BubbleDetail {
            question: question.clone(),
            marked: outcome.label().to_string(),
            correct: Some(answer.clone()),
            is_correct,
            status,
            bubbles: detected.map(|a| a.bubbles.clone()).unwrap_or_default(),
        });
    }
    details.sort_by_key(|d| question_number(&d.question));

    let keyed: HashSet<&str> = key.entries().map(|(q, _)| q.as_str()).collect();
    details.extend(
        detection
            .answers
            .iter()
            .filter(|a| !keyed.contains(a.question.as_str()))
            .map(unscored),
    );

    let total = key.len();
    let percentage = (total > 0).then(|| round2(points / total as f64 * 100.0));
    debug_assert!(
        points >= total as f64 * scheme.min_points() - 1e-9
            && points <= total as f64 * scheme.max_points() + 1e-9
    );

    ScoreResult {
        score: Some(points),
        total: Some(total),
        percentage,
        bubble_details: details,
        multi_marked_count: detection.multi_marked_count,
        unmarked_count: detection.unmarked_count,
    }
}

fn unscored(answer: &DetectedAnswer) -> BubbleDetail {
    BubbleDetail {
        question: answer.question.clone(),
        marked: answer.outcome.label().to_string(),
        correct: None,
        is_correct: None,
        status: QuestionStatus::Unscored,
        bubbles: answer.bubbles.clone(),
    }
}

/// Digits of a question id read as a number (`q12` -> 12), 0 when it has none
fn question_number(question: &str) -> u64 {
    let digits: String = question.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
