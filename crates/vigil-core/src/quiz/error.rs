//! Quiz lifecycle error types.

use thiserror::Error;

use super::QuizStatus;

/// Errors that can occur during quiz lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Attempted an invalid state transition.
    #[error("invalid transition from {from} via {operation}")]
    InvalidTransition {
        /// The current status.
        from: QuizStatus,
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// The question set given at activation was empty.
    #[error("cannot activate session {session_id} without questions")]
    EmptyQuestionSet {
        /// The session being activated.
        session_id: String,
    },

    /// Two questions in the set share an id.
    #[error("duplicate question id {question_id} in session {session_id}")]
    DuplicateQuestion {
        /// The session being activated.
        session_id: String,
        /// The repeated id.
        question_id: String,
    },

    /// An answer referenced a question outside the session's set.
    #[error("question {question_id} is not part of session {session_id}")]
    UnknownQuestion {
        /// The session.
        session_id: String,
        /// The unknown question id.
        question_id: String,
    },

    /// An answer picked an option index outside `0..4`.
    #[error("option {option} out of range for question {question_id}")]
    OptionOutOfRange {
        /// The question.
        question_id: String,
        /// The rejected index.
        option: usize,
    },
}

impl LifecycleError {
    pub(crate) const fn transition(from: QuizStatus, operation: &'static str) -> Self {
        Self::InvalidTransition { from, operation }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_invalid_transition_error() {
        let err = LifecycleError::transition(QuizStatus::Submitted, "activate");
        assert_eq!(err.to_string(), "invalid transition from submitted via activate");
    }

    #[test]
    fn test_unknown_question_error() {
        let err = LifecycleError::UnknownQuestion {
            session_id: "sess-9".to_string(),
            question_id: "q-404".to_string(),
        };
        assert!(err.to_string().contains("q-404"));
        assert!(err.to_string().contains("sess-9"));
    }
}
