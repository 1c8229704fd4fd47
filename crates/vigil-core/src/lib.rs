#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! vigil-core - proctored assessment integrity engine
//!
//! Monitors a candidate's page for integrity violations while they sit an
//! online multiple-choice test, aggregates those violations into a
//! terminate-or-continue decision, and supplies the question set.
//!
//! # Runtime Requirements
//!
//! Detectors and the assessment supervisor spawn tokio tasks. Every `start`
//! and [`assessment::Assessment::begin`] must run inside a tokio runtime;
//! starting a detector outside one returns
//! [`detector::DetectorError::NoRuntime`].
//!
//! # Modules
//!
//! - [`event`]: `ProctorEvent`, the event type vocabulary and the session log
//! - [`host`]: the page host capability (`IntegrityHost`) with in-memory and
//!   JSON-line relay implementations
//! - [`presence`]: per-session presence channels
//! - [`detector`]: the five integrity detectors and their set
//! - [`attestation`]: locked-down shell attestation
//! - [`aggregator`]: violation counting and the termination policy
//! - [`quiz`]: the quiz lifecycle state machine and scoring
//! - [`session`]: per-session shared context
//! - [`questions`]: the question generation pipeline and fallback bank
//! - [`report`]: the non-blocking event reporting sink
//! - [`assessment`]: end-to-end orchestration of one attempt
//! - [`config`]: TOML configuration

pub mod aggregator;
pub mod assessment;
pub mod attestation;
pub mod config;
pub mod detector;
pub mod event;
pub mod host;
pub mod presence;
pub mod questions;
pub mod quiz;
pub mod report;
pub mod session;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use aggregator::{EventClass, Verdict, ViolationAggregator, ViolationCounter, ViolationPolicy};
pub use assessment::{Assessment, AssessmentError, AssessmentRequest, AssessmentServices};
pub use attestation::{Attestation, EnvironmentWatch, attest};
pub use config::{ConfigError, VigilConfig};
pub use detector::{Detector, DetectorKind, DetectorSet, EventSink};
pub use event::{EventLog, ProctorEvent, ProctorEventType};
pub use host::{FakeHost, HostSignal, IntegrityHost, RelayHost};
pub use presence::{PresenceChannel, PresenceHub};
pub use questions::{
    Difficulty, FallbackBank, GeneratedSet, GenerationError, GenerationRequest, Question,
    QuestionPipeline, QuestionSource,
};
pub use quiz::{QuizLifecycle, QuizStatus, SessionOutcome, TerminationReason};
pub use report::{EventReporter, HttpEventReporter, MemoryReporter, NullReporter};
pub use session::{SessionContext, SessionResults};
