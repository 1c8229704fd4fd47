//! Per-session shared state.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregator::ViolationCounter;
use crate::event::{EventLog, ProctorEvent};
use crate::questions::Difficulty;
use crate::quiz::{LifecycleError, QuizLifecycle, SessionOutcome, TerminationReason};

/// Everything one quiz session owns: its lifecycle, violation counter and
/// event log. Shared as `Arc<SessionContext>` between the aggregator task
/// and the caller; the counter and log never cross sessions.
#[derive(Debug)]
pub struct SessionContext {
    session_id: String,
    user_identity: Option<String>,
    lifecycle: QuizLifecycle,
    counter: ViolationCounter,
    log: EventLog,
}

/// Results view of a finished session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResults {
    /// The frozen outcome.
    pub outcome: SessionOutcome,
    /// Latest counted violations, oldest first.
    pub recent_violations: Vec<ProctorEvent>,
    /// Every event logged for the session.
    pub events_logged: usize,
}

impl SessionContext {
    /// Creates a `not_started` session.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        user_identity: Option<String>,
        career_path: impl Into<String>,
        difficulty: Difficulty,
        recent_capacity: usize,
    ) -> Self {
        let session_id = session_id.into();
        Self {
            lifecycle: QuizLifecycle::new(session_id.clone(), career_path, difficulty),
            session_id,
            user_identity,
            counter: ViolationCounter::new(recent_capacity),
            log: EventLog::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Candidate identity, if known.
    #[must_use]
    pub fn user_identity(&self) -> Option<&str> {
        self.user_identity.as_deref()
    }

    /// The quiz state machine.
    #[must_use]
    pub const fn lifecycle(&self) -> &QuizLifecycle {
        &self.lifecycle
    }

    /// The violation counter.
    #[must_use]
    pub const fn counter(&self) -> &ViolationCounter {
        &self.counter
    }

    /// The event log.
    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    /// Submits, stamping the outcome with the current counter value.
    ///
    /// # Errors
    ///
    /// Fails unless the session is active.
    pub fn submit(&self, now: DateTime<Utc>) -> Result<SessionOutcome, LifecycleError> {
        self.lifecycle.submit(now, self.counter.value())
    }

    /// Terminates, stamping the outcome with the current counter value.
    ///
    /// # Errors
    ///
    /// Fails unless the session is active.
    pub fn terminate(&self, reason: TerminationReason, now: DateTime<Utc>) -> Result<SessionOutcome, LifecycleError> {
        self.lifecycle.terminate(reason, now, self.counter.value())
    }

    /// The results view, once the session has finished.
    #[must_use]
    pub fn results(&self) -> Option<SessionResults> {
        self.lifecycle.outcome().map(|outcome| SessionResults {
            outcome,
            recent_violations: self.counter.recent(),
            events_logged: self.log.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ProctorEventType;
    use crate::test_fixtures::active_context;

    #[test]
    fn results_appear_only_after_finish() {
        let ctx = active_context("sess-r");
        assert!(ctx.results().is_none());

        ctx.counter()
            .increment(&ProctorEvent::new(ProctorEventType::FocusLoss, "sess-r"));
        ctx.submit(Utc::now()).unwrap();
        let results = ctx.results().unwrap();
        assert_eq!(results.outcome.violations, 1);
        assert_eq!(results.recent_violations.len(), 1);
    }

    #[test]
    fn terminate_after_submit_fails() {
        let ctx = active_context("sess-r");
        ctx.submit(Utc::now()).unwrap();
        assert!(ctx.terminate(TerminationReason::Abandoned, Utc::now()).is_err());
    }
}
