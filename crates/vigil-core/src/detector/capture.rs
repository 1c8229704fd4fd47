//! Capture-attempt detector.
//!
//! Watches the print-screen key, OS region-capture chords, save chords and
//! abrupt focus loss. Every trigger emits an event and flashes an opaque
//! overlay across the viewport so a capture taken in that instant is useless.
//! A blocked save also shows a warning naming the disabled action.

use std::sync::Arc;

use super::{Detector, DetectorError, DetectorKind, EventSink, Listeners, next_signal};
use crate::config::CaptureConfig;
use crate::event::ProctorEventType;
use crate::host::{BlockedAction, HostSignal, IntegrityHost, KeyChord};

const PRINT_SCREEN: &str = "printscreen";

const SAVE_WARNING: &str = "Saving the page is disabled during the assessment";

/// Region-capture and save chords, with the trigger label they report.
fn capture_chords() -> Vec<(KeyChord, &'static str)> {
    vec![
        // macOS screenshot chords.
        (KeyChord::key("3").meta().shift(), "region-capture"),
        (KeyChord::key("4").meta().shift(), "region-capture"),
        (KeyChord::key("5").meta().shift(), "region-capture"),
        // Windows snipping tool.
        (KeyChord::key("s").meta().shift(), "region-capture"),
        (KeyChord::key("s").ctrl(), "save"),
        (KeyChord::key("s").meta(), "save"),
    ]
}

fn classify(signal: &HostSignal, chords: &[(KeyChord, &'static str)]) -> Option<(ProctorEventType, &'static str)> {
    match signal {
        HostSignal::FocusLost => Some((ProctorEventType::FocusLoss, "focus-loss")),
        HostSignal::Key { chord, .. } if chord.is_key(PRINT_SCREEN) => {
            Some((ProctorEventType::CaptureAttempt, "print-screen"))
        },
        HostSignal::Key { chord, .. } => chords
            .iter()
            .find(|(candidate, _)| candidate.matches(chord))
            .map(|(_, trigger)| (ProctorEventType::CaptureAttempt, *trigger)),
        _ => None,
    }
}

/// Detects screen-capture attempts.
pub struct CaptureDetector {
    config: CaptureConfig,
    host: Arc<dyn IntegrityHost>,
    sink: EventSink,
    listeners: Option<Listeners>,
}

impl CaptureDetector {
    /// Creates a stopped detector.
    #[must_use]
    pub fn new(config: CaptureConfig, host: Arc<dyn IntegrityHost>, sink: EventSink) -> Self {
        Self {
            config,
            host,
            sink,
            listeners: None,
        }
    }
}

impl Detector for CaptureDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Capture
    }

    fn start(&mut self) -> Result<(), DetectorError> {
        if self.listeners.is_some() {
            return Ok(());
        }
        let mut listeners = Listeners::new(self.kind());
        let chords = capture_chords();
        for (chord, _) in &chords {
            listeners.block(&self.host, BlockedAction::Shortcut(chord.clone()));
        }

        let emitter = listeners.emitter(&self.sink);
        let host = Arc::clone(&self.host);
        let flash = self.config.flash();
        let warning = self.config.warning();
        let mut signals = host.subscribe();
        listeners.spawn(async move {
            while let Some(signal) = next_signal(&mut signals).await {
                let Some((kind, trigger)) = classify(&signal, &chords) else {
                    continue;
                };
                if !emitter.emit(emitter.event(kind).with_meta("trigger", trigger)) {
                    continue;
                }
                host.flash_overlay(flash);
                match trigger {
                    // The capture may already be on the clipboard.
                    "print-screen" => {
                        let _ = host.write_clipboard("");
                    },
                    "save" => host.show_warning(SAVE_WARNING, warning),
                    _ => {},
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
