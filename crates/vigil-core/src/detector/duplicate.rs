//! Duplicate-session detector.
//!
//! Announces this context on the session's presence channel at start and on
//! every heartbeat. Any announcement from a different context on the same
//! channel means a second live instance of the test: a `duplicate-session`
//! event is emitted immediately, once per peer. There is no leader election;
//! both contexts report each other.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Detector, DetectorError, DetectorKind, EventSink, Listeners};
use crate::config::DuplicateConfig;
use crate::event::ProctorEventType;
use crate::presence::{PresenceAnnouncement, PresenceChannel};

/// Detects a second open instance of the same session.
pub struct DuplicateSessionDetector {
    config: DuplicateConfig,
    channel: Arc<dyn PresenceChannel>,
    sink: EventSink,
    context_id: Uuid,
    listeners: Option<Listeners>,
}

impl DuplicateSessionDetector {
    /// Creates a stopped detector with a fresh context identity.
    #[must_use]
    pub fn new(config: DuplicateConfig, channel: Arc<dyn PresenceChannel>, sink: EventSink) -> Self {
        Self {
            config,
            channel,
            sink,
            context_id: Uuid::new_v4(),
            listeners: None,
        }
    }

    /// This context's identity on the presence channel.
    #[must_use]
    pub const fn context_id(&self) -> Uuid {
        self.context_id
    }
}

fn announcement(session_id: &str, context_id: Uuid) -> PresenceAnnouncement {
    PresenceAnnouncement {
        session_id: session_id.to_string(),
        context_id,
        announced_at: Utc::now(),
    }
}

impl Detector for DuplicateSessionDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::DuplicateSession
    }

    fn start(&mut self) -> Result<(), DetectorError> {
        if self.listeners.is_some() {
            return Ok(());
        }
        let mut listeners = Listeners::new(self.kind());
        let emitter = listeners.emitter(&self.sink);
        let session_id = self.sink.session_id().to_string();
        let context_id = self.context_id;
        let channel = Arc::clone(&self.channel);
        let period = self.config.heartbeat();

        // Subscribe before announcing so a peer's immediate reply is not lost.
        let mut peers = channel.subscribe();
        channel.announce(&announcement(&session_id, context_id))?;

        listeners.spawn(async move {
            let mut heartbeat = interval_at(Instant::now() + period, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut reported: HashSet<Uuid> = HashSet::new();
            loop {
                tokio::select! {
                    received = peers.recv() => match received {
                        Ok(peer) => {
                            if peer.context_id == context_id || peer.session_id != session_id {
                                continue;
                            }
                            if reported.insert(peer.context_id) {
                                emitter.emit(
                                    emitter
                                        .event(ProctorEventType::DuplicateSession)
                                        .with_meta("peerContext", peer.context_id.to_string())
                                        .with_meta("channel", channel.name()),
                                );
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "presence listener lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = heartbeat.tick() => {
                        if !emitter.is_armed() {
                            break;
                        }
                        if let Err(e) = channel.announce(&announcement(&session_id, context_id)) {
                            warn!(error = %e, "presence heartbeat failed");
                        }
                    },
                }
            }
        })?;

        self.listeners = Some(listeners);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut listeners) = self.listeners.take() {
            listeners.teardown();
        }
    }

    fn is_running(&self) -> bool {
        self.listeners.is_some()
    }
}
