//! Cross-context presence channels.
//!
//! Each open instance of a test announces itself on a channel named after the
//! session. A channel delivers every announcement to every subscriber,
//! including the announcer; receivers filter their own announcements out by
//! [`PresenceAnnouncement::context_id`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

const PRESENCE_CHANNEL_CAPACITY: usize = 64;

/// Errors raised by presence transports.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The underlying transport is gone.
    #[error("presence channel {channel} closed")]
    Closed {
        /// Channel name.
        channel: String,
    },
}

/// One "I am here" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceAnnouncement {
    /// Session the announcer is running.
    pub session_id: String,
    /// Random identity of the announcing context.
    pub context_id: Uuid,
    /// When the announcement was made.
    pub announced_at: DateTime<Utc>,
}

/// Broadcast-style messaging between page contexts of one session.
pub trait PresenceChannel: Send + Sync {
    /// Channel name.
    fn name(&self) -> &str;

    /// Publishes an announcement to every subscriber.
    fn announce(&self, announcement: &PresenceAnnouncement) -> Result<(), PresenceError>;

    /// Subscribes to announcements made from now on.
    fn subscribe(&self) -> broadcast::Receiver<PresenceAnnouncement>;
}

/// Returns the channel name for a session.
#[must_use]
pub fn channel_name(session_id: &str) -> String {
    format!("vigil-presence:{session_id}")
}

/// In-process presence channel.
#[derive(Debug, Clone)]
pub struct LocalPresenceChannel {
    name: String,
    sender: broadcast::Sender<PresenceAnnouncement>,
}

impl PresenceChannel for LocalPresenceChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn announce(&self, announcement: &PresenceAnnouncement) -> Result<(), PresenceError> {
        // A send with no live receivers is still a successful announcement.
        let _ = self.sender.send(announcement.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PresenceAnnouncement> {
        self.sender.subscribe()
    }
}

/// Registry of in-process presence channels keyed by name.
#[derive(Debug, Default)]
pub struct PresenceHub {
    channels: Mutex<HashMap<String, broadcast::Sender<PresenceAnnouncement>>>,
}

impl PresenceHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel for a session, creating it on first use.
    #[must_use]
    pub fn channel(&self, session_id: &str) -> Arc<dyn PresenceChannel> {
        let name = channel_name(session_id);
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = channels
            .entry(name.clone())
            .or_insert_with(|| broadcast::channel(PRESENCE_CHANNEL_CAPACITY).0)
            .clone();
        Arc::new(LocalPresenceChannel { name, sender })
    }

    /// Drops channels nobody is listening on.
    pub fn prune(&self) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Number of channels currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
