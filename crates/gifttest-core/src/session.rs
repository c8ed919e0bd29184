//! The test session state machine.
//!
//! `NotStarted → InProgress → {Completed, EndedEarly}`. Every transition takes
//! `&mut self`; a rejected command returns a `SessionError` and leaves the
//! session exactly as it was.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::model::QuestionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    InProgress,
    Completed,
    EndedEarly,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::EndedEarly)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not started"),
            SessionState::InProgress => write!(f, "in progress"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::EndedEarly => write!(f, "ended early"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestSession {
    selected: Vec<QuestionId>,
    current: usize,
    answers: HashMap<QuestionId, Option<usize>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    state: SessionState,
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSession {
    pub fn new() -> Self {
        Self {
            selected: Vec::new(),
            current: 0,
            answers: HashMap::new(),
            started_at: None,
            ended_at: None,
            state: SessionState::NotStarted,
        }
    }

    /// Begin the test over `ids`, in the given order.
    pub fn start(&mut self, ids: Vec<QuestionId>) -> Result<(), SessionError> {
        self.require(SessionState::NotStarted, "start")?;
        if ids.is_empty() {
            return Err(SessionError::EmptySelection);
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(SessionError::DuplicateQuestion(*dup));
        }

        tracing::debug!(questions = ids.len(), "test session started");
        self.selected = ids;
        self.current = 0;
        self.started_at = Some(Utc::now());
        self.state = SessionState::InProgress;
        Ok(())
    }

    /// Record `choice` (answer index) for `id`, replacing any earlier answer.
    ///
    /// The session does not see the bank, so `choice` is not range-checked
    /// here; an out-of-range choice counts as answered and wrong. Use
    /// `PracticeContext::answer` to reject it up front.
    pub fn answer(&mut self, id: QuestionId, choice: usize) -> Result<(), SessionError> {
        self.record(id, Some(choice), "answer")
    }

    /// Record an explicit "no answer" for `id`.
    pub fn clear_answer(&mut self, id: QuestionId) -> Result<(), SessionError> {
        self.record(id, None, "clear an answer in")
    }

    /// Move forward one question. Returns `false` when already on the last one.
    pub fn next(&mut self) -> Result<bool, SessionError> {
        self.require(SessionState::InProgress, "navigate")?;
        if self.current + 1 < self.selected.len() {
            self.current += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Move back one question. Returns `false` when already on the first one.
    pub fn previous(&mut self) -> Result<bool, SessionError> {
        self.require(SessionState::InProgress, "navigate")?;
        if self.current > 0 {
            self.current -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Whether the caller has to confirm before finishing: the current
    /// question has no recorded answer.
    pub fn needs_confirmation(&self) -> bool {
        self.state == SessionState::InProgress
            && self
                .current_question()
                .is_some_and(|id| self.recorded_answer(id).is_none())
    }

    /// Complete the test. Only allowed on the last question.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        self.require(SessionState::InProgress, "finish")?;
        if self.current + 1 != self.selected.len() {
            return Err(SessionError::NotAtLastQuestion {
                current: self.current + 1,
                total: self.selected.len(),
            });
        }
        self.terminate(SessionState::Completed);
        Ok(())
    }

    /// Stop the test where it is. Questions after the cursor are out of scope.
    pub fn end_now(&mut self) -> Result<(), SessionError> {
        self.require(SessionState::InProgress, "end")?;
        self.terminate(SessionState::EndedEarly);
        Ok(())
    }

    /// Ids that count towards the score, once the session has terminated.
    ///
    /// An early end keeps every question before the cursor, and the current
    /// one only if it was answered.
    pub fn scope(&self) -> Option<&[QuestionId]> {
        match self.state {
            SessionState::Completed => Some(&self.selected),
            SessionState::EndedEarly => {
                let answered_current = self
                    .current_question()
                    .is_some_and(|id| self.recorded_answer(id).is_some());
                let len = self.current + usize::from(answered_current);
                Some(&self.selected[..len])
            }
            SessionState::NotStarted | SessionState::InProgress => None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selected(&self) -> &[QuestionId] {
        &self.selected
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> Option<QuestionId> {
        self.selected.get(self.current).copied()
    }

    /// The chosen answer index for `id`, if one is recorded.
    pub fn recorded_answer(&self, id: QuestionId) -> Option<usize> {
        self.answers.get(&id).copied().flatten()
    }

    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|a| a.is_some()).count()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    fn record(
        &mut self,
        id: QuestionId,
        choice: Option<usize>,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        self.require(SessionState::InProgress, operation)?;
        if !self.selected.contains(&id) {
            return Err(SessionError::UnknownQuestion(id));
        }
        self.answers.insert(id, choice);
        Ok(())
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn terminate(&mut self, state: SessionState) {
        self.state = state;
        self.ended_at = Some(Utc::now());
        tracing::info!(
            outcome = %state,
            position = self.current + 1,
            total = self.selected.len(),
            answered = self.answered_count(),
            "test session ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ids(n: u32) -> Vec<QuestionId> {
        (1..=n).map(QuestionId).collect()
    }

    fn started(n: u32) -> TestSession {
        let mut s = TestSession::new();
        s.start(ids(n)).unwrap();
        s
    }

    #[test]
    fn start_validates_selection() {
        let mut s = TestSession::new();
        assert_eq!(s.start(vec![]), Err(SessionError::EmptySelection));
        assert_eq!(
            s.start(vec![QuestionId(1), QuestionId(2), QuestionId(1)]),
            Err(SessionError::DuplicateQuestion(QuestionId(1)))
        );
        assert_eq!(s.state(), SessionState::NotStarted);

        s.start(ids(2)).unwrap();
        assert_eq!(s.state(), SessionState::InProgress);
        assert!(s.started_at().is_some());
        assert!(matches!(
            s.start(ids(2)),
            Err(SessionError::InvalidState { operation: "start", .. })
        ));
    }

    #[test]
    fn commands_before_start_are_rejected() {
        let mut s = TestSession::new();
        assert!(s.answer(QuestionId(1), 0).is_err());
        assert!(s.next().is_err());
        assert!(s.finish().is_err());
        assert!(s.end_now().is_err());
        assert!(!s.needs_confirmation());
        assert!(s.scope().is_none());
    }

    #[test]
    fn navigation_is_clamped() {
        let mut s = started(3);
        assert_eq!(s.previous(), Ok(false));
        assert_eq!(s.next(), Ok(true));
        assert_eq!(s.next(), Ok(true));
        assert_eq!(s.next(), Ok(false));
        assert_eq!(s.current_index(), 2);
        assert_eq!(s.previous(), Ok(true));
        assert_eq!(s.current_index(), 1);
    }

    #[test]
    fn answers_overwrite_and_do_not_move_cursor() {
        let mut s = started(2);
        s.answer(QuestionId(1), 0).unwrap();
        s.answer(QuestionId(1), 2).unwrap();
        assert_eq!(s.recorded_answer(QuestionId(1)), Some(2));
        assert_eq!(s.current_index(), 0);

        s.clear_answer(QuestionId(1)).unwrap();
        assert_eq!(s.recorded_answer(QuestionId(1)), None);
        assert_eq!(s.answered_count(), 0);

        assert_eq!(
            s.answer(QuestionId(9), 0),
            Err(SessionError::UnknownQuestion(QuestionId(9)))
        );
    }

    #[test]
    fn finish_requires_last_question() {
        let mut s = started(2);
        assert_eq!(
            s.finish(),
            Err(SessionError::NotAtLastQuestion {
                current: 1,
                total: 2
            })
        );
        s.next().unwrap();
        assert!(s.needs_confirmation());
        s.answer(QuestionId(2), 1).unwrap();
        assert!(!s.needs_confirmation());
        s.finish().unwrap();
        assert_eq!(s.state(), SessionState::Completed);
        assert_eq!(s.scope().unwrap(), ids(2).as_slice());
        assert!(s.ended_at().is_some());
    }

    #[test]
    fn terminal_sessions_are_frozen() {
        let mut s = started(3);
        s.answer(QuestionId(1), 0).unwrap();
        s.end_now().unwrap();

        let before = (s.current_index(), s.recorded_answer(QuestionId(1)));
        assert!(s.answer(QuestionId(1), 1).is_err());
        assert!(s.clear_answer(QuestionId(1)).is_err());
        assert!(s.next().is_err());
        assert!(s.previous().is_err());
        assert!(s.finish().is_err());
        assert!(s.end_now().is_err());
        assert_eq!(before, (s.current_index(), s.recorded_answer(QuestionId(1))));
        assert_eq!(s.state(), SessionState::EndedEarly);
    }

    #[test]
    fn early_end_scope() {
        // On question 2 with it answered: Q1 and Q2 count.
        let mut s = started(3);
        s.answer(QuestionId(1), 0).unwrap();
        s.next().unwrap();
        s.answer(QuestionId(2), 0).unwrap();
        s.end_now().unwrap();
        assert_eq!(s.scope().unwrap(), &[QuestionId(1), QuestionId(2)]);

        // On question 2 without an answer: only Q1 counts.
        let mut s = started(3);
        s.next().unwrap();
        s.end_now().unwrap();
        assert_eq!(s.scope().unwrap(), &[QuestionId(1)]);

        // Ending on the first, unanswered question leaves nothing in scope.
        let mut s = started(3);
        s.end_now().unwrap();
        assert!(s.scope().unwrap().is_empty());
    }

    #[test]
    fn random_command_sequences_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(0x6177);
        for _ in 0..200 {
            let n = rng.gen_range(1..=6u32);
            let mut s = started(n);
            for _ in 0..rng.gen_range(0..40) {
                let id = QuestionId(rng.gen_range(1..=n + 1));
                let terminal_before = s.state().is_terminal();
                let snapshot = (s.current_index(), s.answered_count());
                let _ = match rng.gen_range(0..7) {
                    0 => s.answer(id, rng.gen_range(0..4)),
                    1 => s.clear_answer(id),
                    2 => s.next().map(|_| ()),
                    3 => s.previous().map(|_| ()),
                    4 => s.finish(),
                    5 if rng.gen_bool(0.2) => s.end_now(),
                    _ => Ok(()),
                };
                if terminal_before {
                    assert_eq!(snapshot, (s.current_index(), s.answered_count()));
                }
                assert!(s.current_index() < s.len());
                assert!(s
                    .answers
                    .keys()
                    .all(|id| s.selected().contains(id)));
            }
            if let Some(scope) = s.scope() {
                assert!(scope.len() <= s.len());
                assert_eq!(scope, &s.selected()[..scope.len()]);
            }
        }
    }
}
