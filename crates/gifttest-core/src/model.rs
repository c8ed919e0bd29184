//! Core data model types for gifttest.
//!
//! Questions are created once by the parser and never mutated afterwards;
//! everything downstream works with shared references into a `QuestionBank`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category bucket for questions that appear before any `$CATEGORY:` header.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Stable per-bank question identifier (1-based entry ordinal in the source file).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(pub u32);

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The answer types gifttest can present and score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKind::MultipleChoice => write!(f, "multiple-choice"),
            QuestionKind::TrueFalse => write!(f, "true/false"),
        }
    }
}

/// One selectable answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub is_correct: bool,
    /// Percentage weight from a `%50%` prefix, if the source gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Per-answer feedback (`#...` after the answer text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// A parsed question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    /// The `::title::` of the entry, if any.
    #[serde(default)]
    pub name: Option<String>,
    pub category: String,
    pub kind: QuestionKind,
    pub stem: String,
    pub answers: Vec<Answer>,
    /// General feedback (`####...`).
    #[serde(default)]
    pub feedback: Option<String>,
}

impl Question {
    /// Indices of every answer flagged correct.
    pub fn correct_indices(&self) -> Vec<usize> {
        self.answers
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_correct)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether choosing `choice` is a correct answer. Out-of-range choices are wrong.
    pub fn is_correct_choice(&self, choice: usize) -> bool {
        self.answers.get(choice).is_some_and(|a| a.is_correct)
    }

    /// All correct answer texts, joined for display.
    pub fn correct_answer_text(&self) -> String {
        self.answers
            .iter()
            .filter(|a| a.is_correct)
            .map(|a| a.text.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Title if present, otherwise the numeric id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("#{}", self.id),
        }
    }
}
