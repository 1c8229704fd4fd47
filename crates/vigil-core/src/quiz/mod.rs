//! Quiz lifecycle state machine.
//!
//! A quiz session moves through four statuses. The session's question set is
//! fixed at activation and the outcome is frozen at the terminal transition.
//!
//! # State Machine
//!
//! ```text
//!   ┌─────────────┐   activate    ┌────────┐   submit    ┌───────────┐
//!   │ not_started │──────────────►│ active │────────────►│ submitted │
//!   └─────────────┘               └───┬────┘             └───────────┘
//!                                     │ terminate
//!                                     ▼
//!                              ┌────────────┐
//!                              │ terminated │
//!                              └────────────┘
//! ```
//!
//! # Valid Transitions
//!
//! | From | Operation | To |
//! |------|-----------|----|
//! | `not_started` | `activate` | `active` |
//! | `active` | `record_answer` | `active` |
//! | `active` | `submit` | `submitted` |
//! | `active` | `terminate` | `terminated` |
//!
//! Every other combination returns [`LifecycleError::InvalidTransition`].
//! `submitted` and `terminated` are absorbing, so a session can never be
//! reported both ways.

mod error;
mod lifecycle;


use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::LifecycleError;
pub use lifecycle::QuizLifecycle;

use crate::event::ProctorEventType;
use crate::questions::{Difficulty, Question};

/// Status of a quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    /// Created, questions not yet assigned.
    NotStarted,
    /// Questions assigned; detectors running.
    Active,
    /// Finished by the candidate.
    Submitted,
    /// Ended by the integrity policy or abandonment.
    Terminated,
}

impl QuizStatus {
    /// Returns the status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::Submitted => "submitted",
            Self::Terminated => "terminated",
        }
    }

    /// Returns `true` for `submitted` and `terminated`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Terminated)
    }
}

impl fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The violation counter reached the configured maximum.
    ViolationThreshold {
        /// Counter value at termination.
        count: u32,
    },
    /// A second live context of the same session was detected.
    DuplicateSession,
    /// The approved shell was left mid-session.
    EnvironmentViolation,
    /// An event type configured as terminal other than the two above.
    TerminalEvent {
        /// The event type.
        event: ProctorEventType,
    },
    /// The candidate left the test page.
    Abandoned,
}

impl TerminationReason {
    /// Maps a terminal event type onto its reason.
    #[must_use]
    pub const fn for_event(kind: ProctorEventType) -> Self {
        match kind {
            ProctorEventType::DuplicateSession => Self::DuplicateSession,
            ProctorEventType::EnvironmentViolation => Self::EnvironmentViolation,
            event => Self::TerminalEvent { event },
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ViolationThreshold { count } => write!(f, "violation threshold reached ({count})"),
            Self::DuplicateSession => f.write_str("duplicate session"),
            Self::EnvironmentViolation => f.write_str("environment violation"),
            Self::TerminalEvent { event } => write!(f, "terminal event {event}"),
            Self::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Selected option per question id. Re-answering replaces the earlier pick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerRecord(BTreeMap<String, u8>);

impl AnswerRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `option` for `question_id`, replacing any earlier answer.
    pub fn record(&mut self, question_id: impl Into<String>, option: u8) {
        self.0.insert(question_id.into(), option);
    }

    /// The option selected for `question_id`.
    #[must_use]
    pub fn get(&self, question_id: &str) -> Option<u8> {
        self.0.get(question_id).copied()
    }

    /// Number of answered questions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was answered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Number of questions whose recorded answer equals the correct option.
///
/// Pure: the same answers and questions always give the same score.
#[must_use]
pub fn score(answers: &AnswerRecord, questions: &[Question]) -> u32 {
    let correct = questions
        .iter()
        .filter(|q| answers.get(&q.id) == Some(q.correct_option_index))
        .count();
    u32::try_from(correct).unwrap_or(u32::MAX)
}

/// Descriptive record of one quiz attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSession {
    /// Session identifier.
    pub session_id: String,
    /// Career path the questions target.
    pub career_path: String,
    /// Requested difficulty.
    pub difficulty: Difficulty,
    /// Set when the session becomes active.
    pub started_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: QuizStatus,
}

/// Frozen result of a finished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    /// Session identifier.
    pub session_id: String,
    /// `submitted` or `terminated`.
    pub status: QuizStatus,
    /// Set for terminated sessions.
    pub reason: Option<TerminationReason>,
    /// Correct answers.
    pub score: u32,
    /// Questions in the set.
    pub total: u32,
    /// Time between activation and the terminal transition.
    #[serde(with = "duration_ms", rename = "elapsedMs")]
    pub elapsed: Duration,
    /// Answers as recorded at the terminal transition.
    pub answers: AnswerRecord,
    /// Violation counter value at the terminal transition.
    pub violations: u32,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}
