//! Integrity detectors.
//!
//! Five independent monitors each watch one signal class and report discrete
//! [`ProctorEvent`]s through a shared [`EventSink`]:
//!
//! | Detector | Signals | Event types |
//! |----------|---------|-------------|
//! | [`CaptureDetector`] | print-screen, region capture, save, focus loss | `capture-attempt`, `focus-loss` |
//! | [`ClipboardMonitor`] | copy, cut, paste; periodic clipboard overwrite | `clipboard-use` |
//! | [`PointerTracker`] | pointer movement and edge dwell | `pointer-inactivity`, `pointer-edge-loitering` |
//! | [`DuplicateSessionDetector`] | presence announcements | `duplicate-session` |
//! | [`InputGuard`] | context menu, selection, drag, restricted shortcuts | `input-restriction-violation` |
//!
//! # Teardown
//!
//! Every listener task, interval and default-action block a detector installs
//! in [`Detector::start`] is owned by a [`Listeners`] value and released in
//! [`Detector::stop`]. Emission goes through an [`ArmedSink`] whose flag is
//! cleared before the tasks are aborted, so no event can leave a stopped
//! detector even if a task is mid-poll when `stop` runs.

mod capture;
mod clipboard;
mod duplicate;
mod input_guard;
mod pointer;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

pub use capture::CaptureDetector;
pub use clipboard::ClipboardMonitor;
pub use duplicate::DuplicateSessionDetector;
pub use input_guard::{InputGuard, RestrictedAction};
pub use pointer::PointerTracker;

use crate::config::DetectorsConfig;
use crate::event::{ProctorEvent, ProctorEventType};
use crate::host::{BlockedAction, HostSignal, IntegrityHost};
use crate::presence::{PresenceChannel, PresenceError};

/// Errors raised while starting a detector.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Detectors spawn listener tasks and need a tokio runtime.
    #[error("detector {detector} requires a tokio runtime")]
    NoRuntime {
        /// The detector that failed to start.
        detector: DetectorKind,
    },

    /// The presence channel refused the initial announcement.
    #[error("presence announcement failed: {0}")]
    Presence(#[from] PresenceError),
}

/// Identifies a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    /// Capture-attempt detector.
    Capture,
    /// Clipboard monitor.
    Clipboard,
    /// Pointer tracker.
    Pointer,
    /// Duplicate-session detector.
    DuplicateSession,
    /// Restricted-input guard.
    InputGuard,
    /// In-session environment re-attestation.
    Environment,
}

impl DetectorKind {
    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Clipboard => "clipboard",
            Self::Pointer => "pointer",
            Self::DuplicateSession => "duplicate-session",
            Self::InputGuard => "input-guard",
            Self::Environment => "environment",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A start/stoppable integrity monitor.
pub trait Detector: Send {
    /// Which detector this is.
    fn kind(&self) -> DetectorKind;

    /// Installs listeners. Starting a running detector is a no-op.
    fn start(&mut self) -> Result<(), DetectorError>;

    /// Removes every listener, interval and block installed by `start`.
    /// Stopping a stopped detector is a no-op.
    fn stop(&mut self);

    /// Whether listeners are installed.
    fn is_running(&self) -> bool;
}

/// Destination for events produced by detectors of one session.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProctorEvent>,
    session_id: Arc<str>,
    user_identity: Option<Arc<str>>,
}

impl EventSink {
    /// Creates a sink stamping events with the session and candidate.
    #[must_use]
    pub fn new(
        tx: mpsc::UnboundedSender<ProctorEvent>,
        session_id: &str,
        user_identity: Option<&str>,
    ) -> Self {
        Self {
            tx,
            session_id: Arc::from(session_id),
            user_identity: user_identity.map(Arc::from),
        }
    }

    /// The session this sink reports for.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Builds an event of `kind` for this sink's session, timestamped now.
    #[must_use]
    pub fn event(&self, kind: ProctorEventType) -> ProctorEvent {
        ProctorEvent::new(kind, &*self.session_id)
            .with_user(self.user_identity.as_deref().map(str::to_string))
    }

    /// Sends an event. Returns `false` when the consumer is gone.
    pub fn emit(&self, event: ProctorEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// An [`EventSink`] gated by its owner's liveness flag.
#[derive(Debug, Clone)]
pub struct ArmedSink {
    sink: EventSink,
    armed: Arc<AtomicBool>,
}

impl ArmedSink {
    /// Builds an event of `kind` for the sink's session.
    #[must_use]
    pub fn event(&self, kind: ProctorEventType) -> ProctorEvent {
        self.sink.event(kind)
    }

    /// Sends the event if the owning detector is still running.
    pub fn emit(&self, event: ProctorEvent) -> bool {
        if !self.armed.load(Ordering::Acquire) {
            return false;
        }
        debug!(
            session_id = %self.sink.session_id(),
            kind = %event.kind(),
            "detector triggered"
        );
        self.sink.emit(event)
    }

    /// Whether the owning detector is still running.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

/// Everything a running detector has installed.
pub(crate) struct Listeners {
    kind: DetectorKind,
    armed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    blocks: Vec<(Arc<dyn IntegrityHost>, BlockedAction)>,
}

impl Listeners {
    pub(crate) fn new(kind: DetectorKind) -> Self {
        Self {
            kind,
            armed: Arc::new(AtomicBool::new(true)),
            tasks: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub(crate) fn emitter(&self, sink: &EventSink) -> ArmedSink {
        ArmedSink {
            sink: sink.clone(),
            armed: Arc::clone(&self.armed),
        }
    }

    pub(crate) fn spawn<F>(&mut self, task: F) -> Result<(), DetectorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| DetectorError::NoRuntime { detector: self.kind })?;
        self.tasks.push(runtime.spawn(task));
        Ok(())
    }

    pub(crate) fn block(&mut self, host: &Arc<dyn IntegrityHost>, action: BlockedAction) {
        host.set_default_blocked(&action, true);
        self.blocks.push((Arc::clone(host), action));
    }

    pub(crate) fn teardown(&mut self) {
        self.armed.store(false, Ordering::Release);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for (host, action) in self.blocks.drain(..) {
            host.set_default_blocked(&action, false);
        }
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Waits for the next host signal, skipping over lag. `None` once the host
/// is gone.
pub(crate) async fn next_signal(rx: &mut broadcast::Receiver<HostSignal>) -> Option<HostSignal> {
    loop {
        match rx.recv().await {
            Ok(signal) => return Some(signal),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "detector lagged behind host signals");
            },
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// The enabled detectors of one session.
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorSet {
    /// Builds every detector enabled in `config`.
    #[must_use]
    pub fn from_config(
        config: &DetectorsConfig,
        host: &Arc<dyn IntegrityHost>,
        presence: &Arc<dyn PresenceChannel>,
        sink: &EventSink,
    ) -> Self {
        let mut detectors: Vec<Box<dyn Detector>> = Vec::new();
        if config.capture.enabled {
            detectors.push(Box::new(CaptureDetector::new(
                config.capture.clone(),
                Arc::clone(host),
                sink.clone(),
            )));
        }
        if config.clipboard.enabled {
            detectors.push(Box::new(ClipboardMonitor::new(
                config.clipboard.clone(),
                Arc::clone(host),
                sink.clone(),
            )));
        }
        if config.pointer.enabled {
            detectors.push(Box::new(PointerTracker::new(
                config.pointer.clone(),
                Arc::clone(host),
                sink.clone(),
            )));
        }
        if config.duplicate.enabled {
            detectors.push(Box::new(DuplicateSessionDetector::new(
                config.duplicate.clone(),
                Arc::clone(presence),
                sink.clone(),
            )));
        }
        if config.input_guard.enabled {
            detectors.push(Box::new(InputGuard::new(
                config.input_guard.clone(),
                Arc::clone(host),
                sink.clone(),
            )));
        }
        Self { detectors }
    }

    /// Wraps an explicit list of detectors.
    #[must_use]
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    /// Starts every detector. If one fails, the ones already started are
    /// stopped again.
    pub fn start_all(&mut self) -> Result<(), DetectorError> {
        for index in 0..self.detectors.len() {
            if let Err(e) = self.detectors[index].start() {
                for started in &mut self.detectors[..index] {
                    started.stop();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stops every detector.
    pub fn stop_all(&mut self) {
        for detector in &mut self.detectors {
            detector.stop();
        }
    }

    /// Kinds of the detectors currently running.
    #[must_use]
    pub fn running(&self) -> Vec<DetectorKind> {
        self.detectors
            .iter()
            .filter(|d| d.is_running())
            .map(|d| d.kind())
            .collect()
    }

    /// Number of detectors in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    /// Returns `true` if every detector is disabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{drain, rig, settle};
    use super::*;
    use crate::host::FakeHost;
    use crate::presence::PresenceHub;

    #[tokio::test(start_paused = true)]
    async fn set_starts_and_stops_every_enabled_detector() {
        let r = rig();
        let hub = PresenceHub::new();
        let presence = hub.channel("sess-test");
        let mut set = DetectorSet::from_config(
            &DetectorsConfig::default(),
            &r.dyn_host,
            &presence,
            &r.sink,
        );
        assert_eq!(set.len(), 5);

        set.start_all().unwrap();
        assert_eq!(set.running().len(), 5);
        assert!(r.host.blocked_count() > 0);

        set.stop_all();
        assert!(set.running().is_empty());
        assert_eq!(r.host.blocked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_detectors_are_not_built() {
        let r = rig();
        let hub = PresenceHub::new();
        let mut config = DetectorsConfig::default();
        config.pointer.enabled = false;
        config.clipboard.enabled = false;
        let set = DetectorSet::from_config(&config, &r.dyn_host, &hub.channel("s"), &r.sink);
        assert_eq!(set.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_set_emits_nothing() {
        let mut r = rig();
        let hub = PresenceHub::new();
        let mut set = DetectorSet::from_config(
            &DetectorsConfig::default(),
            &r.dyn_host,
            &hub.channel("sess-test"),
            &r.sink,
        );
        set.start_all().unwrap();
        set.stop_all();

        r.host.send(HostSignal::Copy);
        r.host.send(HostSignal::FocusLost);
        r.host.send(HostSignal::ContextMenu);
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        settle().await;
        assert!(drain(&mut r.rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn save_chord_reports_once_and_warns() {
        let mut r = rig();
        let hub = PresenceHub::new();
        let mut set = DetectorSet::from_config(
            &DetectorsConfig::default(),
            &r.dyn_host,
            &hub.channel("sess-test"),
            &r.sink,
        );
        set.start_all().unwrap();

        r.host.send(HostSignal::Key {
            chord: crate::host::KeyChord::key("s").ctrl(),
            in_input_field: false,
        });
        settle().await;

        let events = drain(&mut r.rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ProctorEventType::CaptureAttempt);
        assert_eq!(r.host.warnings().len(), 1);
        set.stop_all();
    }

    #[test]
    fn start_outside_runtime_fails_cleanly() {
        let host: Arc<dyn IntegrityHost> = Arc::new(FakeHost::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, "s", None);
        let mut detector = ClipboardMonitor::new(Default::default(), host, sink);
        let err = detector.start().unwrap_err();
        assert!(matches!(
            err,
            DetectorError::NoRuntime {
                detector: DetectorKind::Clipboard
            }
        ));
        assert!(!detector.is_running());
    }
}
