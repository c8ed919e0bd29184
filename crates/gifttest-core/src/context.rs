//! Practice context: the loaded bank, the active session and the history store.

use std::path::Path;

use anyhow::{bail, Result};

use crate::bank::{CategoryFilter, QuestionBank};
use crate::error::{PersistenceError, ScoringError, SessionError};
use crate::history::{HistoryRecord, HistoryStore};
use crate::model::QuestionId;
use crate::parser::{parse_file, ParseWarning};
use crate::scoring::{score, ScoreSummary};
use crate::session::{SessionState, TestSession};

/// Default size of a quick test.
pub const DEFAULT_QUICK_TEST_QUESTIONS: usize = 20;
pub const MIN_QUICK_TEST_QUESTIONS: usize = 5;
pub const MAX_QUICK_TEST_QUESTIONS: usize = 100;

/// What happened to a finished session.
#[derive(Debug)]
pub enum FinalizeOutcome {
    Recorded {
        summary: ScoreSummary,
        record: HistoryRecord,
    },
    /// No question was answered; nothing was logged.
    SkippedNoAnswers { summary: ScoreSummary },
    /// The record is kept in memory but could not be written.
    PersistenceFailed {
        summary: ScoreSummary,
        record: HistoryRecord,
        error: PersistenceError,
    },
}

impl FinalizeOutcome {
    pub fn summary(&self) -> &ScoreSummary {
        match self {
            FinalizeOutcome::Recorded { summary, .. }
            | FinalizeOutcome::SkippedNoAnswers { summary }
            | FinalizeOutcome::PersistenceFailed { summary, .. } => summary,
        }
    }
}

pub struct PracticeContext {
    bank: Option<QuestionBank>,
    history: HistoryStore,
    session: Option<TestSession>,
}

impl PracticeContext {
    pub fn new(history: HistoryStore) -> Self {
        Self {
            bank: None,
            history,
            session: None,
        }
    }

    /// Parse `path` and make it the current bank. Any active session is dropped.
    pub fn load_bank(&mut self, path: &Path) -> Result<Vec<ParseWarning>> {
        let (bank, warnings) = parse_file(path)?;
        self.replace_bank(bank);
        Ok(warnings)
    }

    pub fn replace_bank(&mut self, bank: QuestionBank) {
        if let Some(session) = self.session.take() {
            if session.state() == SessionState::InProgress {
                tracing::warn!("discarding an unfinished session for a new bank");
            }
        }
        tracing::info!(source = bank.source(), questions = bank.len(), "question bank loaded");
        self.bank = Some(bank);
    }

    pub fn bank(&self) -> Option<&QuestionBank> {
        self.bank.as_ref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn session(&self) -> Option<&TestSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut TestSession> {
        self.session.as_mut()
    }

    /// Start a test over `ids`, which must all come from the current bank.
    pub fn start_test(&mut self, ids: Vec<QuestionId>) -> Result<&mut TestSession> {
        let Some(bank) = &self.bank else {
            bail!("no question bank loaded");
        };
        if let Some(missing) = ids.iter().find(|id| bank.by_id(**id).is_none()) {
            bail!("question {missing} is not in {}", bank.source());
        }
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::InProgress)
        {
            bail!("a test is already in progress");
        }

        let mut session = TestSession::new();
        session.start(ids)?;
        Ok(self.session.insert(session))
    }

    /// Record `choice` for `id` in the active session after checking it
    /// against the question's answers.
    pub fn answer(&mut self, id: QuestionId, choice: usize) -> Result<()> {
        let (Some(bank), Some(session)) = (&self.bank, &mut self.session) else {
            bail!("no test in progress");
        };
        let question = bank
            .by_id(id)
            .ok_or(SessionError::UnknownQuestion(id))?;
        if choice >= question.answers.len() {
            return Err(SessionError::ChoiceOutOfRange {
                id,
                choice,
                options: question.answers.len(),
            }
            .into());
        }
        session.answer(id, choice)?;
        Ok(())
    }

    /// Start a test of `count` random questions from every category.
    ///
    /// The count is clamped to the allowed range and to the bank size.
    pub fn start_quick_test(&mut self, count: usize, seed: Option<u64>) -> Result<&mut TestSession> {
        let Some(bank) = &self.bank else {
            bail!("no question bank loaded");
        };
        if bank.is_empty() {
            bail!("{} has no usable questions", bank.source());
        }
        let count = clamp_quick_test(count).min(bank.len());
        let ids = bank.select(&[CategoryFilter::All], count, seed)?;
        self.start_test(ids)
    }

    /// Score the terminated session and log it.
    ///
    /// The session is consumed on success. Sessions without any answered
    /// question are scored but not logged.
    pub fn finalize(&mut self) -> Result<FinalizeOutcome, ScoringError> {
        let (Some(session), Some(bank)) = (&self.session, &self.bank) else {
            return Err(ScoringError::NotTerminated(SessionState::NotStarted));
        };
        let summary = score(session, bank)?;
        let source = bank.source().to_string();
        self.session = None;

        if summary.answered == 0 {
            tracing::info!("no answered questions, test not logged");
            return Ok(FinalizeOutcome::SkippedNoAnswers { summary });
        }

        let record = summary.clone().into_record(&source);
        Ok(match self.history.append(record.clone()) {
            Ok(()) => FinalizeOutcome::Recorded { summary, record },
            Err(error) => FinalizeOutcome::PersistenceFailed {
                summary,
                record,
                error,
            },
        })
    }
}

pub fn clamp_quick_test(count: usize) -> usize {
    count.clamp(MIN_QUICK_TEST_QUESTIONS, MAX_QUICK_TEST_QUESTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn bank(n: usize) -> QuestionBank {
        let text: String = (1..=n)
            .map(|i| format!("::Q{i}:: Question {i}? {{=right ~wrong}}\n\n"))
            .collect();
        parse(&text, "ctx.gift").0
    }

    fn context(n: usize) -> PracticeContext {
        let mut ctx = PracticeContext::new(HistoryStore::in_memory());
        ctx.replace_bank(bank(n));
        ctx
    }

    #[test]
    fn start_requires_a_bank_and_known_ids() {
        let mut ctx = PracticeContext::new(HistoryStore::in_memory());
        assert!(ctx.start_test(vec![QuestionId(1)]).is_err());

        ctx.replace_bank(bank(3));
        assert!(ctx.start_test(vec![QuestionId(9)]).is_err());
        assert!(ctx.start_test(vec![]).is_err());
        ctx.start_test(vec![QuestionId(1), QuestionId(2)]).unwrap();
        assert!(ctx.start_test(vec![QuestionId(3)]).is_err());
    }

    #[test]
    fn finalize_logs_answered_sessions() {
        let mut ctx = context(3);
        let session = ctx.start_test(vec![QuestionId(1), QuestionId(2)]).unwrap();
        session.answer(QuestionId(1), 0).unwrap();
        session.next().unwrap();
        session.answer(QuestionId(2), 1).unwrap();
        session.finish().unwrap();

        let (summary, record) = match ctx.finalize().unwrap() {
            FinalizeOutcome::Recorded { summary, record } => (summary, record),
            other => panic!("expected a recorded outcome, got {other:?}"),
        };
        assert_eq!(summary.percentage, 50.0);
        assert_eq!(record.source, "ctx.gift");
        assert_eq!(ctx.history().len(), 1);
        assert!(ctx.session().is_none());
    }

    #[test]
    fn sessions_without_answers_are_not_logged() {
        let mut ctx = context(3);
        ctx.start_test(vec![QuestionId(1), QuestionId(2)]).unwrap();
        ctx.session_mut().unwrap().end_now().unwrap();

        let outcome = ctx.finalize().unwrap();
        assert!(matches!(outcome, FinalizeOutcome::SkippedNoAnswers { .. }));
        assert_eq!(outcome.summary().total_asked, 0);
        assert!(ctx.history().is_empty());
    }

    #[test]
    fn finalize_rejects_active_sessions() {
        let mut ctx = context(2);
        assert!(ctx.finalize().is_err());
        ctx.start_test(vec![QuestionId(1)]).unwrap();
        assert_eq!(
            ctx.finalize().unwrap_err(),
            ScoringError::NotTerminated(SessionState::InProgress)
        );
        assert!(ctx.session().is_some());
    }

    #[test]
    fn answers_are_checked_against_the_bank() {
        let mut ctx = context(3);
        assert!(ctx.answer(QuestionId(1), 0).is_err());

        ctx.start_test(vec![QuestionId(1), QuestionId(2)]).unwrap();
        let err = ctx.answer(QuestionId(1), 2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::ChoiceOutOfRange {
                id: QuestionId(1),
                choice: 2,
                options: 2
            })
        );
        assert_eq!(ctx.session().unwrap().answered_count(), 0);

        assert!(ctx.answer(QuestionId(3), 0).is_err());
        ctx.answer(QuestionId(1), 1).unwrap();
        assert_eq!(ctx.session().unwrap().recorded_answer(QuestionId(1)), Some(1));
    }

    #[test]
    fn quick_test_is_clamped() {
        let mut ctx = context(8);
        assert_eq!(ctx.start_quick_test(1, Some(1)).unwrap().len(), 5);

        let mut ctx = context(8);
        assert_eq!(ctx.start_quick_test(50, Some(1)).unwrap().len(), 8);

        assert_eq!(clamp_quick_test(500), MAX_QUICK_TEST_QUESTIONS);
    }

    #[test]
    fn reloading_replaces_the_bank_and_drops_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.gift");
        std::fs::write(&path, "::X:: Only? {=yes ~no}\n").unwrap();

        let mut ctx = context(3);
        ctx.start_test(vec![QuestionId(1)]).unwrap();
        let warnings = ctx.load_bank(&path).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(ctx.bank().unwrap().len(), 1);
        assert!(ctx.session().is_none());
    }
}
