//! Environment attestation.
//!
//! A single synchronous predicate over the environment fingerprint decides
//! whether the candidate is inside an approved locked-down shell. When the
//! deployment requires a shell, a failed check keeps the session from ever
//! becoming active.
//!
//! [`EnvironmentWatch`] re-runs the predicate whenever the host reports a new
//! fingerprint during an active session.

use std::sync::Arc;

use serde::Serialize;

use crate::config::AttestationConfig;
use crate::detector::{ArmedSink, DetectorError, DetectorKind, EventSink, Listeners, next_signal};
use crate::event::ProctorEventType;
use crate::host::{EnvironmentFingerprint, HostSignal, IntegrityHost};

/// Result of an attestation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum Attestation {
    /// The deployment does not require a locked-down shell.
    NotRequired,
    /// An approved shell was recognised.
    Approved {
        /// The user-agent token or marker that matched.
        matched: String,
    },
    /// A shell is required and none was recognised.
    Rejected,
}

impl Attestation {
    /// Whether the session may start.
    #[must_use]
    pub const fn permits_start(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Inspects the fingerprint for an approved shell, ignoring whether the
/// deployment requires one.
#[must_use]
pub fn recognise_shell(config: &AttestationConfig, fingerprint: &EnvironmentFingerprint) -> Option<String> {
    let user_agent = fingerprint.user_agent.to_ascii_lowercase();
    config
        .user_agent_tokens
        .iter()
        .find(|token| !token.is_empty() && user_agent.contains(&token.to_ascii_lowercase()))
        .or_else(|| {
            config
                .markers
                .iter()
                .find(|marker| fingerprint.markers.contains(&marker.to_ascii_lowercase()))
        })
        .cloned()
}

/// Runs the attestation predicate.
#[must_use]
pub fn attest(config: &AttestationConfig, fingerprint: &EnvironmentFingerprint) -> Attestation {
    if !config.required {
        return Attestation::NotRequired;
    }
    match recognise_shell(config, fingerprint) {
        Some(matched) => Attestation::Approved { matched },
        None => Attestation::Rejected,
    }
}

/// Re-attests on every `environment-changed` signal of an active session and
/// reports an `environment-violation` when the shell disappears.
pub struct EnvironmentWatch {
    config: AttestationConfig,
    host: Arc<dyn IntegrityHost>,
    sink: EventSink,
    listeners: Option<Listeners>,
}

impl EnvironmentWatch {
    /// Creates a stopped watch.
    #[must_use]
    pub fn new(config: AttestationConfig, host: Arc<dyn IntegrityHost>, sink: EventSink) -> Self {
        Self {
            config,
            host,
            sink,
            listeners: None,
        }
    }

    /// Starts watching. Does nothing when attestation is not required.
    pub fn start(&mut self) -> Result<(), DetectorError> {
        if self.listeners.is_some() || !self.config.required {
            return Ok(());
        }
        let mut listeners = Listeners::new(DetectorKind::Environment);
        let emitter = listeners.emitter(&self.sink);
        let config = self.config.clone();
        let mut signals = self.host.subscribe();
        listeners.spawn(async move {
            while let Some(signal) = next_signal(&mut signals).await {
                if let HostSignal::EnvironmentChanged { fingerprint } = signal {
                    report_if_rejected(&config, &fingerprint, &emitter);
                }
            }
        })?;
        self.listeners = Some(listeners);
        Ok(())
    }

    /// Stops watching.
    pub fn stop(&mut self) {
        if let Some(mut listeners) = self.listeners.take() {
            listeners.teardown();
        }
    }
}

fn report_if_rejected(config: &AttestationConfig, fingerprint: &EnvironmentFingerprint, emitter: &ArmedSink) {
    if attest(config, fingerprint) == Attestation::Rejected {
        emitter.emit(
            emitter
                .event(ProctorEventType::EnvironmentViolation)
                .with_meta("userAgent", fingerprint.user_agent.clone()),
        );
    }
}
