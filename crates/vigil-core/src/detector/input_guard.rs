//! Restricted-input guard.
//!
//! Suppresses the context menu, text selection outside answer fields, drag
//! operations and a fixed set of shortcuts. Each suppressed attempt is
//! reported and answered with an on-screen warning naming the action.

use std::sync::Arc;

use super::{Detector, DetectorError, DetectorKind, EventSink, Listeners, next_signal};
use crate::config::InputGuardConfig;
use crate::event::ProctorEventType;
use crate::host::{BlockedAction, HostSignal, IntegrityHost, KeyChord};

/// Input actions the guard suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestrictedAction {
    /// Right-click menu.
    ContextMenu,
    /// Selecting question text.
    TextSelection,
    /// Dragging page content.
    Drag,
    /// Opening developer tools.
    DevTools,
    /// Viewing page source.
    ViewSource,
    /// Printing the page.
    Print,
    /// Selecting the whole page.
    SelectAll,
}

impl RestrictedAction {
    /// Stable name reported in event metadata.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ContextMenu => "context-menu",
            Self::TextSelection => "text-selection",
            Self::Drag => "drag",
            Self::DevTools => "devtools",
            Self::ViewSource => "view-source",
            Self::Print => "print",
            Self::SelectAll => "select-all",
        }
    }

    /// Warning shown to the candidate.
    #[must_use]
    pub const fn warning(&self) -> &'static str {
        match self {
            Self::ContextMenu => "Right-click is disabled during the assessment",
            Self::TextSelection => "Selecting question text is not allowed",
            Self::Drag => "Dragging content is not allowed",
            Self::DevTools => "Developer tools are blocked during the assessment",
            Self::ViewSource => "Viewing the page source is blocked",
            Self::Print => "Printing is disabled during the assessment",
            Self::SelectAll => "Select-all is disabled outside answer fields",
        }
    }
}

fn restricted_shortcuts() -> Vec<(KeyChord, RestrictedAction)> {
    vec![
        (KeyChord::key("f12"), RestrictedAction::DevTools),
        (KeyChord::key("i").ctrl().shift(), RestrictedAction::DevTools),
        (KeyChord::key("j").ctrl().shift(), RestrictedAction::DevTools),
        (KeyChord::key("c").ctrl().shift(), RestrictedAction::DevTools),
        (KeyChord::key("i").meta().alt(), RestrictedAction::DevTools),
        (KeyChord::key("j").meta().alt(), RestrictedAction::DevTools),
        (KeyChord::key("c").meta().alt(), RestrictedAction::DevTools),
        (KeyChord::key("u").ctrl(), RestrictedAction::ViewSource),
        (KeyChord::key("u").meta().alt(), RestrictedAction::ViewSource),
        (KeyChord::key("p").ctrl(), RestrictedAction::Print),
        (KeyChord::key("p").meta(), RestrictedAction::Print),
        (KeyChord::key("a").ctrl(), RestrictedAction::SelectAll),
        (KeyChord::key("a").meta(), RestrictedAction::SelectAll),
    ]
}

fn classify(signal: &HostSignal, shortcuts: &[(KeyChord, RestrictedAction)]) -> Option<RestrictedAction> {
    match signal {
        HostSignal::ContextMenu => Some(RestrictedAction::ContextMenu),
        HostSignal::SelectionStart { in_input_field } if !in_input_field => {
            Some(RestrictedAction::TextSelection)
        },
        HostSignal::DragStart => Some(RestrictedAction::Drag),
        HostSignal::Key {
            chord,
            in_input_field,
        } => shortcuts
            .iter()
            .find(|(candidate, _)| candidate.matches(chord))
            .map(|(_, action)| *action)
            .filter(|action| !(*in_input_field && *action == RestrictedAction::SelectAll)),
        _ => None,
    }
}

/// Suppresses and reports restricted input.
pub struct InputGuard {
    config: InputGuardConfig,
    host: Arc<dyn IntegrityHost>,
    sink: EventSink,
    listeners: Option<Listeners>,
}

impl InputGuard {
    /// Creates a stopped guard.
    #[must_use]
    pub fn new(config: InputGuardConfig, host: Arc<dyn IntegrityHost>, sink: EventSink) -> Self {
        Self {
            config,
            host,
            sink,
            listeners: None,
        }
    }
}

impl Detector for InputGuard {
    fn kind(&self) -> DetectorKind {
        DetectorKind::InputGuard
    }

    fn start(&mut self) -> Result<(), DetectorError> {
        if self.listeners.is_some() {
            return Ok(());
        }
        let mut listeners = Listeners::new(self.kind());
        let shortcuts = restricted_shortcuts();
        for action in [
            BlockedAction::ContextMenu,
            BlockedAction::TextSelection,
            BlockedAction::Drag,
        ] {
            listeners.block(&self.host, action);
        }
        // Select-all stays available in answer fields; elsewhere the
        // text-selection block already leaves nothing to select.
        for (chord, action) in &shortcuts {
            if *action != RestrictedAction::SelectAll {
                listeners.block(&self.host, BlockedAction::Shortcut(chord.clone()));
            }
        }

        let emitter = listeners.emitter(&self.sink);
        let host = Arc::clone(&self.host);
        let warning = self.config.warning();
        let mut signals = host.subscribe();
        listeners.spawn(async move {
            while let Some(signal) = next_signal(&mut signals).await {
                let Some(action) = classify(&signal, &shortcuts) else {
                    continue;
                };
                let mut event = emitter
                    .event(ProctorEventType::InputRestrictionViolation)
                    .with_meta("action", action.as_str());
                if let HostSignal::Key { chord, .. } = &signal {
                    event = event.with_meta("shortcut", chord.to_string());
                }
                if emitter.emit(event) {
                    host.show_warning(action.warning(), warning);
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
