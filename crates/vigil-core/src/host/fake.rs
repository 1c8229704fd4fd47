//! In-memory host that records every command it receives.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use super::{
    BlockedAction, EnvironmentFingerprint, HostError, HostSignal, IntegrityHost,
    SIGNAL_CHANNEL_CAPACITY, Viewport,
};

#[derive(Debug, Default)]
struct FakeState {
    viewport: Viewport,
    environment: EnvironmentFingerprint,
    clipboard: Option<String>,
    clipboard_denied: bool,
    flashes: Vec<Duration>,
    warnings: Vec<String>,
    clipboard_writes: Vec<String>,
    blocked: HashMap<BlockedAction, usize>,
}

/// Host double driven entirely from test code.
///
/// Signals are injected with [`FakeHost::send`]; presentation commands are
/// recorded and can be inspected afterwards.
#[derive(Debug)]
pub struct FakeHost {
    signals: broadcast::Sender<HostSignal>,
    state: Mutex<FakeState>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    /// Creates a host with the default viewport and an empty environment.
    #[must_use]
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            signals,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Creates a host that reports the given environment.
    #[must_use]
    pub fn with_environment(environment: EnvironmentFingerprint) -> Self {
        let host = Self::new();
        host.state().environment = environment;
        host
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers a signal to every current subscriber.
    ///
    /// Resize, environment and clipboard signals also update the cached
    /// values, as a real host would.
    pub fn send(&self, signal: HostSignal) {
        {
            let mut state = self.state();
            match &signal {
                HostSignal::ViewportResized { width, height } => {
                    state.viewport = Viewport::new(*width, *height);
                },
                HostSignal::EnvironmentChanged { fingerprint } => {
                    state.environment = fingerprint.clone();
                },
                HostSignal::ClipboardContents { text } => state.clipboard.clone_from(text),
                _ => {},
            }
        }
        // No subscribers is not an error for a host.
        let _ = self.signals.send(signal);
    }

    /// Sets clipboard text without emitting a signal.
    pub fn set_clipboard(&self, text: Option<&str>) {
        self.state().clipboard = text.map(str::to_string);
    }

    /// Makes clipboard reads and writes fail with a permission error.
    pub fn deny_clipboard(&self, denied: bool) {
        self.state().clipboard_denied = denied;
    }

    /// Current clipboard text.
    #[must_use]
    pub fn clipboard(&self) -> Option<String> {
        self.state().clipboard.clone()
    }

    /// Every flash rendered so far.
    #[must_use]
    pub fn flashes(&self) -> Vec<Duration> {
        self.state().flashes.clone()
    }

    /// Every warning shown so far.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.state().warnings.clone()
    }

    /// Every successful clipboard write so far.
    #[must_use]
    pub fn clipboard_writes(&self) -> Vec<String> {
        self.state().clipboard_writes.clone()
    }

    /// Whether an action currently has at least one active block.
    #[must_use]
    pub fn is_blocked(&self, action: &BlockedAction) -> bool {
        self.state().blocked.get(action).is_some_and(|count| *count > 0)
    }

    /// Number of actions with an active block.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.state().blocked.values().filter(|count| **count > 0).count()
    }

    /// Number of live signal subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.signals.receiver_count()
    }
}

impl IntegrityHost for FakeHost {
    fn subscribe(&self) -> broadcast::Receiver<HostSignal> {
        self.signals.subscribe()
    }

    fn viewport(&self) -> Viewport {
        self.state().viewport
    }

    fn environment(&self) -> EnvironmentFingerprint {
        self.state().environment.clone()
    }

    fn read_clipboard(&self) -> Result<Option<String>, HostError> {
        let state = self.state();
        if state.clipboard_denied {
            return Err(HostError::denied("clipboard-read"));
        }
        Ok(state.clipboard.clone())
    }

    fn write_clipboard(&self, text: &str) -> Result<(), HostError> {
        let mut state = self.state();
        if state.clipboard_denied {
            return Err(HostError::denied("clipboard-write"));
        }
        state.clipboard = Some(text.to_string()).filter(|t| !t.is_empty());
        state.clipboard_writes.push(text.to_string());
        Ok(())
    }

    fn flash_overlay(&self, duration: Duration) {
        self.state().flashes.push(duration);
    }

    fn show_warning(&self, message: &str, _duration: Duration) {
        self.state().warnings.push(message.to_string());
    }

    fn set_default_blocked(&self, action: &BlockedAction, blocked: bool) {
        let mut state = self.state();
        let count = state.blocked.entry(action.clone()).or_insert(0);
        if blocked {
            *count += 1;
        } else {
            *count = count.saturating_sub(1);
        }
    }
}
