//! Violation aggregation.
//!
//! Every detector event of a session passes through
//! [`ViolationAggregator::ingest`], which logs it, forwards it to the
//! reporting sink and applies the integrity policy:
//!
//! | Class | Effect |
//! |-------|--------|
//! | `Counted` | counter += 1; terminate once the counter reaches the maximum |
//! | `Telemetry` | logged and reported only |
//! | `Terminal` | terminate immediately, counter untouched |
//!
//! Events of foreign sessions and of sessions that never became active are
//! rejected. Events arriving after the terminal transition are still logged
//! and counted but cannot change the frozen outcome.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::PolicyConfig;
use crate::event::{ProctorEvent, ProctorEventType};
use crate::quiz::{QuizStatus, SessionOutcome, TerminationReason};
use crate::report::EventReporter;
use crate::session::SessionContext;

/// Monotonic violation counter with a bounded list of the latest counted
/// events.
#[derive(Debug)]
pub struct ViolationCounter {
    count: AtomicU32,
    recent: Mutex<VecDeque<ProctorEvent>>,
    capacity: usize,
}

impl ViolationCounter {
    /// Creates a zero counter remembering up to `capacity` recent events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            count: AtomicU32::new(0),
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Counts one violation. Returns the new value.
    pub fn increment(&self, event: &ProctorEvent) -> u32 {
        let value = self.count.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.capacity > 0 {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        value
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// The latest counted events, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<ProctorEvent> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// How an event type affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Increments the violation counter.
    Counted,
    /// Recorded without effect.
    Telemetry,
    /// Terminates the session at once.
    Terminal,
}

/// Classification of event types plus the threshold.
#[derive(Debug, Clone)]
pub struct ViolationPolicy {
    max_violations: u32,
    telemetry: HashSet<ProctorEventType>,
    terminal: HashSet<ProctorEventType>,
}

impl ViolationPolicy {
    /// Builds the policy from configuration.
    #[must_use]
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            max_violations: config.max_violations,
            telemetry: config.telemetry.iter().copied().collect(),
            terminal: config.terminal.iter().copied().collect(),
        }
    }

    /// Counter value that terminates the session.
    #[must_use]
    pub const fn max_violations(&self) -> u32 {
        self.max_violations
    }

    /// Classifies an event type. Terminal wins over telemetry.
    #[must_use]
    pub fn classify(&self, kind: ProctorEventType) -> EventClass {
        if self.terminal.contains(&kind) {
            EventClass::Terminal
        } else if self.telemetry.contains(&kind) {
            EventClass::Telemetry
        } else {
            EventClass::Counted
        }
    }
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

/// Why an event was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The event names a different session.
    ForeignSession,
    /// The session never became active.
    NotStarted,
}

/// What ingesting one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Not logged, not reported.
    Rejected(Rejection),
    /// Logged and reported without touching the counter or status.
    Recorded,
    /// Counted; the session stays as it was.
    Counted {
        /// Counter value after this event.
        count: u32,
        /// Violations left before termination.
        remaining: u32,
    },
    /// This event ended the session.
    Terminated {
        /// Why.
        reason: TerminationReason,
        /// The frozen outcome.
        outcome: SessionOutcome,
    },
}

/// Applies the integrity policy to a session's events.
pub struct ViolationAggregator {
    policy: ViolationPolicy,
    reporter: Arc<dyn EventReporter>,
}

impl std::fmt::Debug for ViolationAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViolationAggregator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ViolationAggregator {
    /// Creates an aggregator reporting to `reporter`.
    #[must_use]
    pub fn new(policy: ViolationPolicy, reporter: Arc<dyn EventReporter>) -> Self {
        Self { policy, reporter }
    }

    /// The policy in force.
    #[must_use]
    pub const fn policy(&self) -> &ViolationPolicy {
        &self.policy
    }

    /// Records an event against `ctx` and applies the policy.
    pub fn ingest(&self, ctx: &SessionContext, event: ProctorEvent) -> Verdict {
        if event.session_id() != ctx.session_id() {
            warn!(
                session_id = %ctx.session_id(),
                event_session = %event.session_id(),
                "rejecting event for a foreign session"
            );
            return Verdict::Rejected(Rejection::ForeignSession);
        }
        let status = ctx.lifecycle().status();
        if status == QuizStatus::NotStarted {
            debug!(session_id = %ctx.session_id(), kind = %event.kind(), "session not started; event rejected");
            return Verdict::Rejected(Rejection::NotStarted);
        }

        let kind = event.kind();
        self.reporter.report(&event);
        let class = self.policy.classify(kind);
        let verdict = match class {
            EventClass::Telemetry => Verdict::Recorded,
            EventClass::Terminal => self.terminate(ctx, TerminationReason::for_event(kind)),
            EventClass::Counted => {
                let count = ctx.counter().increment(&event);
                let max = self.policy.max_violations;
                if count >= max && status == QuizStatus::Active {
                    self.terminate(ctx, TerminationReason::ViolationThreshold { count })
                } else {
                    Verdict::Counted {
                        count,
                        remaining: max.saturating_sub(count),
                    }
                }
            },
        };
        ctx.log().append(event);
        verdict
    }

    fn terminate(&self, ctx: &SessionContext, reason: TerminationReason) -> Verdict {
        match ctx.terminate(reason.clone(), Utc::now()) {
            Ok(outcome) => {
                info!(
                    session_id = %ctx.session_id(),
                    reason = %reason,
                    violations = outcome.violations,
                    "session terminated by integrity policy"
                );
                Verdict::Terminated { reason, outcome }
            },
            // Already submitted or terminated; the frozen outcome stands.
            Err(_) => match reason {
                TerminationReason::ViolationThreshold { count } => Verdict::Counted {
                    count,
                    remaining: 0,
                },
                _ => Verdict::Recorded,
            },
        }
    }
}
