//! Assessment orchestration.
//!
//! [`Assessment::begin`] runs one proctored attempt from start to finish:
//!
//! 1. attest the environment (a rejected environment never starts a session)
//! 2. create the session context in `not_started`
//! 3. obtain the question set from the pipeline
//! 4. install detectors, then activate the session
//! 5. supervise: feed detector events to the aggregator, show violation
//!    warnings, and tear everything down at the terminal transition
//!
//! Detectors are stopped on every terminal path: submission, policy
//! termination and abandonment. Dropping a still-active [`Assessment`]
//! abandons it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregator::{Verdict, ViolationAggregator, ViolationPolicy};
use crate::attestation::{EnvironmentWatch, attest};
use crate::config::VigilConfig;
use crate::detector::{DetectorError, DetectorKind, DetectorSet, EventSink, next_signal};
use crate::event::ProctorEvent;
use crate::host::{HostSignal, IntegrityHost};
use crate::presence::PresenceChannel;
use crate::questions::{
    Difficulty, GenerationError, GenerationRequest, Question, QuestionPipeline, QuestionSource,
};
use crate::quiz::{LifecycleError, QuizStatus, SessionOutcome, TerminationReason};
use crate::report::EventReporter;
use crate::session::SessionContext;

/// Errors that prevent or interrupt an assessment.
#[derive(Debug, Error)]
pub enum AssessmentError {
    /// The candidate is not inside an approved locked-down shell.
    #[error("assessment requires {shell_name}; download it from {download_url}")]
    EnvironmentNotApproved {
        /// Name of the required shell.
        shell_name: String,
        /// Where to get it.
        download_url: String,
    },

    /// No question set could be assembled.
    #[error("question generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// The requested lifecycle operation is not allowed now.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Detectors could not be installed.
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

/// What the candidate asked to sit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentRequest {
    /// Session identifier, also the presence channel key.
    pub session_id: String,
    /// Candidate identity; stamped on events and used for question history.
    pub candidate_id: Option<String>,
    /// Career path.
    pub career_path: String,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Number of questions; the configured default when `None`.
    pub count: Option<usize>,
}

/// Collaborators an assessment runs against.
pub struct AssessmentServices {
    /// The page host.
    pub host: Arc<dyn IntegrityHost>,
    /// The session's presence channel.
    pub presence: Arc<dyn PresenceChannel>,
    /// Question source.
    pub pipeline: Arc<QuestionPipeline>,
    /// Event reporting sink.
    pub reporter: Arc<dyn EventReporter>,
}

struct Monitors {
    detectors: DetectorSet,
    environment: EnvironmentWatch,
}

impl Monitors {
    fn start(&mut self) -> Result<(), DetectorError> {
        self.detectors.start_all()?;
        if let Err(e) = self.environment.start() {
            self.detectors.stop_all();
            return Err(e);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.detectors.stop_all();
        self.environment.stop();
    }
}

struct Shared {
    ctx: Arc<SessionContext>,
    host: Arc<dyn IntegrityHost>,
    pipeline: Arc<QuestionPipeline>,
    monitors: Mutex<Monitors>,
    outcome: watch::Sender<Option<SessionOutcome>>,
}

impl Shared {
    fn monitors(&self) -> MutexGuard<'_, Monitors> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn conclude(&self, outcome: SessionOutcome) {
        self.monitors().stop();
        self.outcome.send_replace(Some(outcome));
    }

    fn abandon(&self) -> Option<SessionOutcome> {
        match self.ctx.terminate(TerminationReason::Abandoned, Utc::now()) {
            Ok(outcome) => {
                self.conclude(outcome.clone());
                self.pipeline.forget_session(self.ctx.session_id());
                Some(outcome)
            },
            Err(_) => None,
        }
    }
}

/// One running proctored attempt.
pub struct Assessment {
    shared: Arc<Shared>,
    source: QuestionSource,
    generation_warning: Option<String>,
    supervisor: JoinHandle<()>,
}

impl std::fmt::Debug for Assessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assessment")
            .field("session_id", &self.shared.ctx.session_id())
            .field("status", &self.shared.ctx.lifecycle().status())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Assessment {
    /// Attests the environment, assembles the questions, installs the
    /// detectors and activates the session.
    ///
    /// # Errors
    ///
    /// `EnvironmentNotApproved` when attestation is required and fails (no
    /// event is emitted and nothing is installed); `Generation` when no
    /// question set can be assembled; `Detector` when listeners cannot be
    /// installed.
    pub async fn begin(
        config: &VigilConfig,
        request: AssessmentRequest,
        services: AssessmentServices,
    ) -> Result<Self, AssessmentError> {
        let AssessmentServices {
            host,
            presence,
            pipeline,
            reporter,
        } = services;

        let attestation = attest(&config.attestation, &host.environment());
        if !attestation.permits_start() {
            warn!(session_id = %request.session_id, "environment not approved; session not started");
            return Err(AssessmentError::EnvironmentNotApproved {
                shell_name: config.attestation.shell_name.clone(),
                download_url: config.attestation.download_url.clone(),
            });
        }

        let ctx = Arc::new(SessionContext::new(
            request.session_id.clone(),
            request.candidate_id.clone(),
            request.career_path.clone(),
            request.difficulty,
            config.policy.recent_capacity,
        ));

        let generation = GenerationRequest {
            career_path: request.career_path,
            difficulty: request.difficulty,
            count: request.count.unwrap_or(config.generation.default_count),
            session_id: Some(request.session_id.clone()),
            candidate_id: request.candidate_id.clone(),
        };
        let generated = pipeline.generate(&generation).await?;

        let (tx, events) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, &request.session_id, request.candidate_id.as_deref());
        let mut monitors = Monitors {
            detectors: DetectorSet::from_config(&config.detectors, &host, &presence, &sink),
            environment: EnvironmentWatch::new(config.attestation.clone(), Arc::clone(&host), sink),
        };
        // Subscribed before anything runs so an early unload is not missed.
        let signals = host.subscribe();
        monitors.start()?;
        if let Err(e) = ctx.lifecycle().activate(generated.questions, Utc::now()) {
            monitors.stop();
            return Err(e.into());
        }

        let (outcome, finished) = watch::channel(None);
        let shared = Arc::new(Shared {
            ctx,
            host,
            pipeline,
            monitors: Mutex::new(monitors),
            outcome,
        });
        let aggregator = ViolationAggregator::new(ViolationPolicy::from_config(&config.policy), reporter);
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&shared),
            aggregator,
            events,
            signals,
            finished,
            config.policy.warning_duration(),
        ));

        info!(
            session_id = %request.session_id,
            source = ?generated.source,
            attestation = ?attestation,
            "assessment started"
        );
        Ok(Self {
            shared,
            source: generated.source,
            generation_warning: generated.warning,
            supervisor,
        })
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.shared.ctx.session_id()
    }

    /// The session context.
    #[must_use]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.shared.ctx
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> QuizStatus {
        self.shared.ctx.lifecycle().status()
    }

    /// The question set.
    #[must_use]
    pub fn questions(&self) -> Vec<Question> {
        self.shared.ctx.lifecycle().questions()
    }

    /// Where the questions came from.
    #[must_use]
    pub const fn source(&self) -> QuestionSource {
        self.source
    }

    /// Why the backend fell short, if it did.
    #[must_use]
    pub fn generation_warning(&self) -> Option<&str> {
        self.generation_warning.as_deref()
    }

    /// Detectors currently installed.
    #[must_use]
    pub fn running_detectors(&self) -> Vec<DetectorKind> {
        self.shared.monitors().detectors.running()
    }

    /// Records an answer.
    ///
    /// # Errors
    ///
    /// Fails once the session has finished or for an unknown question or
    /// option.
    pub fn answer(&self, question_id: &str, option: usize) -> Result<(), AssessmentError> {
        Ok(self.shared.ctx.lifecycle().record_answer(question_id, option)?)
    }

    /// Submits the attempt and stops every detector.
    ///
    /// # Errors
    ///
    /// Fails if the session already finished.
    pub fn submit(&self) -> Result<SessionOutcome, AssessmentError> {
        let outcome = self.shared.ctx.submit(Utc::now())?;
        self.shared.conclude(outcome.clone());
        Ok(outcome)
    }

    /// Terminates the attempt as abandoned, stops every detector and clears
    /// the session's used-question ledger. `None` if already finished.
    pub fn abandon(&self) -> Option<SessionOutcome> {
        self.shared.abandon()
    }

    /// Waits for the terminal transition.
    pub async fn finished(&self) -> Option<SessionOutcome> {
        let mut rx = self.shared.outcome.subscribe();
        let outcome = rx.wait_for(Option::is_some).await.ok()?;
        outcome.clone()
    }
}

impl Drop for Assessment {
    fn drop(&mut self) {
        self.supervisor.abort();
        if self.shared.abandon().is_none() {
            self.shared.monitors().stop();
        }
    }
}

fn warning_text(count: u32, max: u32) -> String {
    format!("Integrity warning {count} of {max}: further violations will end the assessment")
}

async fn supervise(
    shared: Arc<Shared>,
    aggregator: ViolationAggregator,
    mut events: mpsc::UnboundedReceiver<ProctorEvent>,
    mut signals: broadcast::Receiver<HostSignal>,
    mut finished: watch::Receiver<Option<SessionOutcome>>,
    warning: Duration,
) {
    // Created with the channel, so a transition made before this task first
    // runs still shows up as a change.
    let mut signals_open = true;
    let max = aggregator.policy().max_violations();
    loop {
        tokio::select! {
            received = events.recv() => {
                let Some(event) = received else { break };
                match aggregator.ingest(&shared.ctx, event) {
                    Verdict::Counted { count, remaining } if remaining > 0 => {
                        if shared.ctx.lifecycle().status() == QuizStatus::Active {
                            shared.host.show_warning(&warning_text(count, max), warning);
                        }
                    },
                    Verdict::Terminated { outcome, .. } => {
                        shared.conclude(outcome);
                        break;
                    },
                    _ => {},
                }
            },
            signal = next_signal(&mut signals), if signals_open => match signal {
                Some(HostSignal::Unloading) => {
                    info!(session_id = %shared.ctx.session_id(), "page unloading; abandoning session");
                    shared.abandon();
                    break;
                },
                Some(_) => {},
                None => signals_open = false,
            },
            changed = finished.changed() => {
                if changed.is_err() || finished.borrow().is_some() {
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FakeHost;
    use crate::presence::PresenceHub;
    use crate::report::NullReporter;

    async fn begin(host: &Arc<FakeHost>, hub: &PresenceHub) -> Assessment {
        let config = VigilConfig::default();
        let services = AssessmentServices {
            host: host.clone(),
            presence: hub.channel("sess-unit"),
            pipeline: Arc::new(QuestionPipeline::from_config(&config.generation).unwrap()),
            reporter: Arc::new(NullReporter),
        };
        let request = AssessmentRequest {
            session_id: "sess-unit".to_string(),
            candidate_id: None,
            career_path: "Data Analyst".to_string(),
            difficulty: Difficulty::Beginner,
            count: Some(3),
        };
        Assessment::begin(&config, request, services).await.unwrap()
    }

    #[test]
    fn warning_names_the_count() {
        assert!(warning_text(2, 5).starts_with("Integrity warning 2 of 5"));
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_exits_when_submitted_before_it_first_runs() {
        let host = Arc::new(FakeHost::new());
        let hub = PresenceHub::new();
        let assessment = begin(&host, &hub).await;

        // No await between begin and submit: the supervisor has not run yet.
        assessment.submit().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(assessment.supervisor.is_finished());
        assert!(assessment.running_detectors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_an_active_assessment_abandons_it() {
        let host = Arc::new(FakeHost::new());
        let hub = PresenceHub::new();
        let assessment = begin(&host, &hub).await;
        let ctx = Arc::clone(assessment.context());
        assert_eq!(ctx.lifecycle().status(), QuizStatus::Active);

        drop(assessment);

        assert_eq!(ctx.lifecycle().status(), QuizStatus::Terminated);
        let outcome = ctx.lifecycle().outcome().unwrap();
        assert_eq!(outcome.reason, Some(TerminationReason::Abandoned));
        assert_eq!(host.blocked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_submitted_assessment_keeps_its_outcome() {
        let host = Arc::new(FakeHost::new());
        let hub = PresenceHub::new();
        let assessment = begin(&host, &hub).await;
        let ctx = Arc::clone(assessment.context());
        assessment.submit().unwrap();

        drop(assessment);

        assert_eq!(ctx.lifecycle().status(), QuizStatus::Submitted);
        assert_eq!(ctx.lifecycle().outcome().unwrap().reason, None);
    }
}
