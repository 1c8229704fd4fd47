//! Host capability interface.
//!
//! Detectors never touch input devices, the clipboard or the page directly.
//! Everything they observe arrives as a [`HostSignal`] on a broadcast
//! subscription, and everything they do (flash the viewport, show a warning,
//! suppress a default action, overwrite the clipboard) goes through
//! [`IntegrityHost`].
//!
//! Two implementations ship with the crate:
//!
//! - [`RelayHost`]: production host. An exam shell streams signals as JSON
//!   lines and receives presentation commands back as JSON lines.
//! - [`FakeHost`]: in-memory host that records every command, used to drive
//!   detectors in tests.

mod fake;
mod relay;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub use fake::FakeHost;
pub use relay::{HostCommand, RelayHost};

/// Capacity of host signal broadcast channels.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 256;

/// Errors reported by host capabilities.
///
/// Detectors treat every host error on a best-effort path as non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The host refused access to a capability.
    #[error("permission denied for {capability}")]
    PermissionDenied {
        /// The capability that was refused.
        capability: String,
    },

    /// The host cannot provide the capability right now.
    #[error("{capability} unavailable: {reason}")]
    Unavailable {
        /// The capability that is unavailable.
        capability: String,
        /// Why it is unavailable.
        reason: String,
    },
}

impl HostError {
    /// Creates a permission-denied error.
    #[must_use]
    pub fn denied(capability: impl Into<String>) -> Self {
        Self::PermissionDenied {
            capability: capability.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            capability: capability.into(),
            reason: reason.into(),
        }
    }
}

/// A key press with its modifier state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyChord {
    /// Key name, compared case-insensitively (`"s"`, `"f12"`, `"printscreen"`).
    pub key: String,
    /// Control held.
    #[serde(default)]
    pub ctrl: bool,
    /// Shift held.
    #[serde(default)]
    pub shift: bool,
    /// Alt/Option held.
    #[serde(default)]
    pub alt: bool,
    /// Meta/Command/Windows held.
    #[serde(default)]
    pub meta: bool,
}

impl KeyChord {
    /// A bare key with no modifiers.
    #[must_use]
    pub fn key(key: &str) -> Self {
        Self {
            key: key.to_ascii_lowercase(),
            ctrl: false,
            shift: false,
            alt: false,
            meta: false,
        }
    }

    /// Adds Control.
    #[must_use]
    pub const fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    /// Adds Shift.
    #[must_use]
    pub const fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Adds Alt.
    #[must_use]
    pub const fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    /// Adds Meta.
    #[must_use]
    pub const fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    /// Exact match on key name and all four modifiers.
    #[must_use]
    pub fn matches(&self, pressed: &Self) -> bool {
        self.key.eq_ignore_ascii_case(&pressed.key)
            && self.ctrl == pressed.ctrl
            && self.shift == pressed.shift
            && self.alt == pressed.alt
            && self.meta == pressed.meta
    }

    /// Key name match ignoring modifiers.
    #[must_use]
    pub fn is_key(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (held, name) in [
            (self.ctrl, "Ctrl+"),
            (self.alt, "Alt+"),
            (self.shift, "Shift+"),
            (self.meta, "Meta+"),
        ] {
            if held {
                f.write_str(name)?;
            }
        }
        f.write_str(&self.key.to_ascii_uppercase())
    }
}

/// Visible page area in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Viewport {
    /// Creates a viewport.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

/// Identity strings and injected markers describing the runtime environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    /// The user agent string.
    #[serde(default)]
    pub user_agent: String,
    /// Lowercased names of host-injected markers that are present.
    #[serde(default)]
    pub markers: BTreeSet<String>,
}

impl EnvironmentFingerprint {
    /// Creates a fingerprint with no markers.
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            markers: BTreeSet::new(),
        }
    }

    /// Adds a marker (stored lowercased).
    #[must_use]
    pub fn with_marker(mut self, marker: &str) -> Self {
        self.markers.insert(marker.to_ascii_lowercase());
        self
    }
}

/// Something the host observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "kebab-case")]
pub enum HostSignal {
    /// A key chord was pressed.
    Key {
        /// The chord.
        chord: KeyChord,
        /// Whether focus was inside a designated answer field.
        #[serde(default)]
        in_input_field: bool,
    },
    /// The page lost focus.
    FocusLost,
    /// The page regained focus.
    FocusRegained,
    /// Copy was attempted.
    Copy,
    /// Cut was attempted.
    Cut,
    /// Paste was attempted.
    Paste,
    /// The context menu was requested.
    ContextMenu,
    /// A text selection started.
    SelectionStart {
        /// Whether the selection started inside a designated answer field.
        #[serde(default)]
        in_input_field: bool,
    },
    /// A drag operation started.
    DragStart,
    /// The pointer moved.
    PointerMoved {
        /// Horizontal position in viewport coordinates.
        x: f64,
        /// Vertical position in viewport coordinates.
        y: f64,
    },
    /// The pointer left the viewport.
    PointerLeftViewport,
    /// The viewport was resized.
    ViewportResized {
        /// New width.
        width: f64,
        /// New height.
        height: f64,
    },
    /// The environment fingerprint changed.
    EnvironmentChanged {
        /// The new fingerprint.
        fingerprint: EnvironmentFingerprint,
    },
    /// The shell reported current clipboard contents.
    ClipboardContents {
        /// Clipboard text, `None` when empty.
        text: Option<String>,
    },
    /// The page is being closed.
    Unloading,
}

/// A default host action that a detector can suppress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum BlockedAction {
    /// Context menu.
    ContextMenu,
    /// Text selection outside answer fields.
    TextSelection,
    /// Drag operations.
    Drag,
    /// Copy.
    Copy,
    /// Cut.
    Cut,
    /// Paste.
    Paste,
    /// A specific key chord.
    Shortcut(KeyChord),
}

/// Host runtime capabilities consumed by detectors.
///
/// Implementations must be cheap to call: [`IntegrityHost::viewport`] and
/// [`IntegrityHost::environment`] return cached values, and the presentation
/// methods only enqueue work.
pub trait IntegrityHost: Send + Sync {
    /// Subscribes to host signals. Each subscriber sees every signal sent
    /// after it subscribed.
    fn subscribe(&self) -> broadcast::Receiver<HostSignal>;

    /// Current viewport size.
    fn viewport(&self) -> Viewport;

    /// Current environment fingerprint.
    fn environment(&self) -> EnvironmentFingerprint;

    /// Reads clipboard text if the host permits it.
    fn read_clipboard(&self) -> Result<Option<String>, HostError>;

    /// Overwrites clipboard text if the host permits it.
    fn write_clipboard(&self, text: &str) -> Result<(), HostError>;

    /// Renders a full-viewport opaque overlay for `duration`, then restores
    /// the normal view.
    fn flash_overlay(&self, duration: Duration);

    /// Shows a transient warning.
    fn show_warning(&self, message: &str, duration: Duration);

    /// Suppresses (or releases) the default behaviour of an action.
    fn set_default_blocked(&self, action: &BlockedAction, blocked: bool);
}
