//! The per-session quiz state machine.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::info;

use super::{
    AnswerRecord, LifecycleError, QuizSession, QuizStatus, SessionOutcome, TerminationReason,
    score,
};
use crate::questions::{Difficulty, OPTION_COUNT, Question};

#[derive(Debug)]
struct LifecycleState {
    session: QuizSession,
    questions: Vec<Question>,
    answers: AnswerRecord,
    outcome: Option<SessionOutcome>,
}

/// Owns one session's status, question set and answers.
///
/// Every transition takes the internal lock, so concurrent callers (the
/// aggregator terminating while the candidate submits) observe exactly one
/// winner; the loser gets [`LifecycleError::InvalidTransition`].
#[derive(Debug)]
pub struct QuizLifecycle {
    state: Mutex<LifecycleState>,
}

impl QuizLifecycle {
    /// Creates a `not_started` session.
    #[must_use]
    pub fn new(session_id: impl Into<String>, career_path: impl Into<String>, difficulty: Difficulty) -> Self {
        Self {
            state: Mutex::new(LifecycleState {
                session: QuizSession {
                    session_id: session_id.into(),
                    career_path: career_path.into(),
                    difficulty,
                    started_at: None,
                    status: QuizStatus::NotStarted,
                },
                questions: Vec::new(),
                answers: AnswerRecord::new(),
                outcome: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the question set and moves to `active`.
    ///
    /// # Errors
    ///
    /// Fails unless the session is `not_started`, or when the set is empty
    /// or repeats a question id.
    pub fn activate(&self, questions: Vec<Question>, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        let mut state = self.lock();
        if state.session.status != QuizStatus::NotStarted {
            return Err(LifecycleError::transition(state.session.status, "activate"));
        }
        if questions.is_empty() {
            return Err(LifecycleError::EmptyQuestionSet {
                session_id: state.session.session_id.clone(),
            });
        }
        let mut ids = HashSet::with_capacity(questions.len());
        for question in &questions {
            if !ids.insert(question.id.as_str()) {
                return Err(LifecycleError::DuplicateQuestion {
                    session_id: state.session.session_id.clone(),
                    question_id: question.id.clone(),
                });
            }
        }

        state.questions = questions;
        state.session.started_at = Some(now);
        state.session.status = QuizStatus::Active;
        info!(
            session_id = %state.session.session_id,
            questions = state.questions.len(),
            "quiz session active"
        );
        Ok(())
    }

    /// Records an answer. Re-answering a question replaces the earlier pick.
    ///
    /// # Errors
    ///
    /// Fails unless the session is `active`, when the question is not in
    /// the set, or when `option` is not a valid option index.
    pub fn record_answer(&self, question_id: &str, option: usize) -> Result<(), LifecycleError> {
        let mut state = self.lock();
        if state.session.status != QuizStatus::Active {
            return Err(LifecycleError::transition(state.session.status, "record_answer"));
        }
        if !state.questions.iter().any(|q| q.id == question_id) {
            return Err(LifecycleError::UnknownQuestion {
                session_id: state.session.session_id.clone(),
                question_id: question_id.to_string(),
            });
        }
        let index = u8::try_from(option)
            .ok()
            .filter(|i| usize::from(*i) < OPTION_COUNT)
            .ok_or_else(|| LifecycleError::OptionOutOfRange {
                question_id: question_id.to_string(),
                option,
            })?;
        state.answers.record(question_id, index);
        Ok(())
    }

    /// Candidate-initiated finish.
    ///
    /// # Errors
    ///
    /// Fails unless the session is `active`.
    pub fn submit(&self, now: DateTime<Utc>, violations: u32) -> Result<SessionOutcome, LifecycleError> {
        self.finish(QuizStatus::Submitted, None, now, violations)
    }

    /// Policy- or abandonment-initiated finish.
    ///
    /// # Errors
    ///
    /// Fails unless the session is `active`.
    pub fn terminate(
        &self,
        reason: TerminationReason,
        now: DateTime<Utc>,
        violations: u32,
    ) -> Result<SessionOutcome, LifecycleError> {
        self.finish(QuizStatus::Terminated, Some(reason), now, violations)
    }

    fn finish(
        &self,
        status: QuizStatus,
        reason: Option<TerminationReason>,
        now: DateTime<Utc>,
        violations: u32,
    ) -> Result<SessionOutcome, LifecycleError> {
        let mut state = self.lock();
        if state.session.status != QuizStatus::Active {
            let operation = if status == QuizStatus::Submitted {
                "submit"
            } else {
                "terminate"
            };
            return Err(LifecycleError::transition(state.session.status, operation));
        }

        let elapsed = state
            .session
            .started_at
            .and_then(|started| (now - started).to_std().ok())
            .unwrap_or_default();
        let outcome = SessionOutcome {
            session_id: state.session.session_id.clone(),
            status,
            reason,
            score: score(&state.answers, &state.questions),
            total: u32::try_from(state.questions.len()).unwrap_or(u32::MAX),
            elapsed,
            answers: state.answers.clone(),
            violations,
        };
        state.session.status = status;
        state.outcome = Some(outcome.clone());
        info!(
            session_id = %outcome.session_id,
            status = %status,
            score = outcome.score,
            total = outcome.total,
            violations,
            "quiz session finished"
        );
        Ok(outcome)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> QuizStatus {
        self.lock().session.status
    }

    /// Snapshot of the session record.
    #[must_use]
    pub fn session(&self) -> QuizSession {
        self.lock().session.clone()
    }

    /// The question set (empty before activation).
    #[must_use]
    pub fn questions(&self) -> Vec<Question> {
        self.lock().questions.clone()
    }

    /// Answers recorded so far.
    #[must_use]
    pub fn answers(&self) -> AnswerRecord {
        self.lock().answers.clone()
    }

    /// The frozen outcome, once the session is `submitted` or `terminated`.
    #[must_use]
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.lock().outcome.clone()
    }
}
