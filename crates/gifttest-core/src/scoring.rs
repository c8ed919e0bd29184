//! Score a terminated test session and aggregate history.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bank::QuestionBank;
use crate::error::ScoringError;
use crate::history::HistoryRecord;
use crate::model::{Question, QuestionId};
use crate::session::{SessionState, TestSession};

/// How a scored session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Completed,
    EndedEarly,
}

/// A wrong or unanswered question, with enough context to review it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrongAnswer {
    pub question_id: QuestionId,
    #[serde(default)]
    pub question_name: Option<String>,
    pub question_text: String,
    pub category: String,
    /// Text of the chosen answer; `None` when the question was left unanswered.
    #[serde(default)]
    pub given_answer: Option<String>,
    pub correct_answer: String,
}

/// The result of scoring one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub outcome: TestOutcome,
    /// Categories of every selected question, sorted.
    pub categories: Vec<String>,
    /// Questions in scope (the denominator).
    pub total_asked: usize,
    pub answered: usize,
    pub correct: usize,
    pub wrong: usize,
    /// `correct / total_asked * 100`, one decimal place.
    pub percentage: f64,
    pub wrong_details: Vec<WrongAnswer>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ScoreSummary {
    /// Stamp a history record for this result.
    pub fn into_record(self, source: &str) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::new_v4(),
            timestamp: self.ended_at.unwrap_or_else(Utc::now),
            source: source.to_string(),
            categories: self.categories,
            outcome: self.outcome,
            total_asked: self.total_asked,
            correct: self.correct,
            wrong: self.wrong,
            percentage: self.percentage,
            wrong_details: self.wrong_details,
        }
    }
}

/// Score a terminated session against the bank it was drawn from.
pub fn score(session: &TestSession, bank: &QuestionBank) -> Result<ScoreSummary, ScoringError> {
    let outcome = match session.state() {
        SessionState::Completed => TestOutcome::Completed,
        SessionState::EndedEarly => TestOutcome::EndedEarly,
        state => return Err(ScoringError::NotTerminated(state)),
    };
    let scope = session.scope().unwrap_or_default();

    let lookup = |id: QuestionId| bank.by_id(id).ok_or(ScoringError::MissingQuestion(id));

    let mut categories = BTreeSet::new();
    for &id in session.selected() {
        categories.insert(lookup(id)?.category.clone());
    }

    let mut correct = 0;
    let mut answered = 0;
    let mut wrong_details = Vec::new();
    for &id in scope {
        let question = lookup(id)?;
        let choice = session.recorded_answer(id);
        if choice.is_some() {
            answered += 1;
        }
        match choice {
            Some(c) if question.is_correct_choice(c) => correct += 1,
            _ => wrong_details.push(wrong_answer(question, choice)),
        }
    }

    let total_asked = scope.len();
    Ok(ScoreSummary {
        outcome,
        categories: categories.into_iter().collect(),
        total_asked,
        answered,
        correct,
        wrong: total_asked - correct,
        percentage: percentage(correct, total_asked),
        wrong_details,
        started_at: session.started_at(),
        ended_at: session.ended_at(),
    })
}

fn wrong_answer(question: &Question, choice: Option<usize>) -> WrongAnswer {
    WrongAnswer {
        question_id: question.id,
        question_name: question.name.clone(),
        question_text: question.stem.clone(),
        category: question.category.clone(),
        given_answer: choice
            .and_then(|c| question.answers.get(c))
            .map(|a| a.text.clone()),
        correct_answer: question.correct_answer_text(),
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 / whole as f64 * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Totals over stored history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total_tests: usize,
    pub total_questions: usize,
    pub total_correct: usize,
    /// Mean of the per-test percentages.
    pub average_score: f64,
}

impl HistoryStats {
    /// Aggregate `records`, keeping only those from `source` when given.
    pub fn from_records<'a>(
        records: impl IntoIterator<Item = &'a HistoryRecord>,
        source: Option<&str>,
    ) -> Self {
        let mut stats = HistoryStats::default();
        let mut percentage_sum = 0.0;
        for r in records
            .into_iter()
            .filter(|r| source.is_none_or(|s| r.source == s))
        {
            stats.total_tests += 1;
            stats.total_questions += r.total_asked;
            stats.total_correct += r.correct;
            percentage_sum += r.percentage;
        }
        if stats.total_tests > 0 {
            stats.average_score = round1(percentage_sum / stats.total_tests as f64);
        }
        stats
    }
}
