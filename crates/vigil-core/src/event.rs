//! Proctor events and the append-only session event log.
//!
//! A [`ProctorEvent`] is created by a detector the instant a signal is
//! observed. Events are immutable once built: fields are private and only the
//! builder methods consuming `self` can attach data before the event leaves
//! its producer.

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Classes of integrity signal a detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProctorEventType {
    /// Print-screen, region-capture or save shortcut.
    CaptureAttempt,
    /// Copy, cut or paste attempt.
    ClipboardUse,
    /// Context menu, selection, drag or a restricted shortcut.
    InputRestrictionViolation,
    /// The page lost focus.
    FocusLoss,
    /// No pointer movement for the inactivity window.
    PointerInactivity,
    /// The pointer dwelt near a viewport edge past the loitering threshold.
    PointerEdgeLoitering,
    /// Another context announced itself on the session's presence channel.
    DuplicateSession,
    /// The environment stopped satisfying attestation mid-session.
    EnvironmentViolation,
}

impl ProctorEventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::CaptureAttempt,
        Self::ClipboardUse,
        Self::InputRestrictionViolation,
        Self::FocusLoss,
        Self::PointerInactivity,
        Self::PointerEdgeLoitering,
        Self::DuplicateSession,
        Self::EnvironmentViolation,
    ];

    /// Returns the wire name of the event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CaptureAttempt => "capture-attempt",
            Self::ClipboardUse => "clipboard-use",
            Self::InputRestrictionViolation => "input-restriction-violation",
            Self::FocusLoss => "focus-loss",
            Self::PointerInactivity => "pointer-inactivity",
            Self::PointerEdgeLoitering => "pointer-edge-loitering",
            Self::DuplicateSession => "duplicate-session",
            Self::EnvironmentViolation => "environment-violation",
        }
    }
}

impl fmt::Display for ProctorEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown proctor event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for ProctorEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// An immutable record of one observed integrity signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctorEvent {
    #[serde(rename = "type")]
    kind: ProctorEventType,
    timestamp: DateTime<Utc>,
    session_id: String,
    #[serde(
        rename = "userEmail",
        alias = "userIdentity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    user_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
}

impl ProctorEvent {
    /// Creates an event stamped with the current wall-clock time.
    #[must_use]
    pub fn new(kind: ProctorEventType, session_id: impl Into<String>) -> Self {
        Self::at(kind, session_id, Utc::now())
    }

    /// Creates an event with an explicit timestamp.
    #[must_use]
    pub fn at(kind: ProctorEventType, session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            session_id: session_id.into(),
            user_identity: None,
            metadata: Map::new(),
        }
    }

    /// Attaches the candidate identity.
    #[must_use]
    pub fn with_user(mut self, user_identity: Option<String>) -> Self {
        self.user_identity = user_identity;
        self
    }

    /// Attaches one metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Replaces the metadata object wholesale.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The event type.
    #[must_use]
    pub const fn kind(&self) -> ProctorEventType {
        self.kind
    }

    /// When the signal was observed.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The candidate identity, if known.
    #[must_use]
    pub fn user_identity(&self) -> Option<&str> {
        self.user_identity.as_deref()
    }

    /// Detector-specific details.
    #[must_use]
    pub const fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

/// Append-only log of every event accepted for a session.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<Vec<ProctorEvent>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn append(&self, event: ProctorEvent) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Number of logged events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the log contents in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProctorEvent> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_names_round_trip() {
        for kind in ProctorEventType::ALL {
            assert_eq!(kind.as_str().parse::<ProctorEventType>(), Ok(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = "keyboard-smash".parse::<ProctorEventType>().unwrap_err();
        assert!(err.to_string().contains("keyboard-smash"));
    }

    #[test]
    fn event_serializes_with_wire_field_names() {
        let event = ProctorEvent::new(ProctorEventType::ClipboardUse, "sess-1")
            .with_user(Some("cand@example.com".to_string()))
            .with_meta("action", "copy");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "clipboard-use");
        assert_eq!(value["sessionId"], "sess-1");
        assert_eq!(value["userEmail"], "cand@example.com");
        assert_eq!(value["metadata"]["action"], "copy");
    }

    #[test]
    fn empty_metadata_and_user_are_omitted() {
        let event = ProctorEvent::new(ProctorEventType::FocusLoss, "sess-2");
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("userEmail").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn log_preserves_append_order() {
        let log = EventLog::new();
        assert!(log.is_empty());
        log.append(ProctorEvent::new(ProctorEventType::FocusLoss, "s"));
        log.append(ProctorEvent::new(ProctorEventType::CaptureAttempt, "s"));
        let kinds: Vec<_> = log.snapshot().iter().map(ProctorEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![ProctorEventType::FocusLoss, ProctorEventType::CaptureAttempt]
        );
        assert_eq!(log.len(), 2);
    }
}
