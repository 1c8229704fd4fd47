//! Configuration parsing and management.
//!
//! Every policy constant of the engine (violation threshold, detector
//! windows, generation timeout, pipeline bounds) is read from a single TOML
//! document. Every field carries a default so an empty document is a valid
//! configuration.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8787"
//!
//! [policy]
//! max_violations = 5
//!
//! [detectors.pointer]
//! inactivity_ms = 30000
//! edge_dwell_ms = 5000
//!
//! [generation]
//! endpoint = "https://questions.internal/v1/generate"
//! api_key_env = "VIGIL_GENERATION_KEY"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::ProctorEventType;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is syntactically valid but semantically unusable.
    #[error("invalid config value for {field}: {reason}")]
    Validation {
        /// Dotted path of the offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VigilConfig {
    /// HTTP daemon settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Violation aggregation policy.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Per-detector settings.
    #[serde(default)]
    pub detectors: DetectorsConfig,

    /// Locked-down shell attestation.
    #[serde(default)]
    pub attestation: AttestationConfig,

    /// Question generation pipeline.
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl VigilConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects values that would disable a policy by accident.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policy.max_violations == 0 {
            return Err(ConfigError::invalid("policy.max_violations", "must be at least 1"));
        }
        if self
            .policy
            .terminal
            .iter()
            .any(|kind| self.policy.telemetry.contains(kind))
        {
            return Err(ConfigError::invalid(
                "policy.terminal",
                "an event type cannot be both terminal and telemetry",
            ));
        }

        let intervals = [
            ("detectors.capture.flash_ms", self.detectors.capture.flash_ms),
            ("detectors.capture.warning_ms", self.detectors.capture.warning_ms),
            ("detectors.clipboard.clear_interval_ms", self.detectors.clipboard.clear_interval_ms),
            ("detectors.pointer.inactivity_ms", self.detectors.pointer.inactivity_ms),
            ("detectors.pointer.edge_dwell_ms", self.detectors.pointer.edge_dwell_ms),
            ("detectors.pointer.poll_interval_ms", self.detectors.pointer.poll_interval_ms),
            ("detectors.duplicate.heartbeat_ms", self.detectors.duplicate.heartbeat_ms),
            ("detectors.input_guard.warning_ms", self.detectors.input_guard.warning_ms),
            ("generation.timeout_ms", self.generation.timeout_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }

        if self.generation.max_count == 0 {
            return Err(ConfigError::invalid("generation.max_count", "must be at least 1"));
        }
        if self.generation.default_count == 0
            || self.generation.default_count > self.generation.max_count
        {
            return Err(ConfigError::invalid(
                "generation.default_count",
                format!("must be within 1..={}", self.generation.max_count),
            ));
        }
        let threshold = self.generation.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "generation.similarity_threshold",
                "must be within (0, 1]",
            ));
        }
        Ok(())
    }
}

/// HTTP daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the daemon binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Maximum number of events retained in memory.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Optional JSON-lines journal that receives every accepted event.
    #[serde(default)]
    pub event_journal: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_events: default_max_events(),
            event_journal: None,
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

const fn default_max_events() -> usize {
    100_000
}

/// How events are weighed against the violation threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Counted violations that force termination.
    #[serde(default = "default_max_violations")]
    pub max_violations: u32,

    /// Event types recorded but never counted. Empty by default, so every
    /// detector output weighs +1.
    #[serde(default = "default_telemetry")]
    pub telemetry: Vec<ProctorEventType>,

    /// Event types that terminate the session immediately.
    #[serde(default = "default_terminal")]
    pub terminal: Vec<ProctorEventType>,

    /// How many recent counted events the rolling list keeps.
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// How long a violation warning stays on screen.
    #[serde(default = "default_warning_ms")]
    pub warning_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_violations: default_max_violations(),
            telemetry: default_telemetry(),
            terminal: default_terminal(),
            recent_capacity: default_recent_capacity(),
            warning_ms: default_warning_ms(),
        }
    }
}

impl PolicyConfig {
    /// Warning display time.
    #[must_use]
    pub const fn warning_duration(&self) -> Duration {
        Duration::from_millis(self.warning_ms)
    }
}

const fn default_max_violations() -> u32 {
    5
}

fn default_telemetry() -> Vec<ProctorEventType> {
    Vec::new()
}

fn default_terminal() -> Vec<ProctorEventType> {
    vec![
        ProctorEventType::DuplicateSession,
        ProctorEventType::EnvironmentViolation,
    ]
}

const fn default_recent_capacity() -> usize {
    50
}

const fn default_warning_ms() -> u64 {
    3_000
}

/// Settings for all five detectors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorsConfig {
    /// Capture-attempt detector.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Clipboard monitor.
    #[serde(default)]
    pub clipboard: ClipboardConfig,
    /// Pointer tracker.
    #[serde(default)]
    pub pointer: PointerConfig,
    /// Duplicate-session detector.
    #[serde(default)]
    pub duplicate: DuplicateConfig,
    /// Restricted-input guard.
    #[serde(default)]
    pub input_guard: InputGuardConfig,
}

/// Capture-attempt detector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Whether the detector runs.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Length of the opaque flash rendered on each trigger.
    #[serde(default = "default_flash_ms")]
    pub flash_ms: u64,
    /// How long the save-disabled warning stays visible.
    #[serde(default = "default_warning_ms")]
    pub warning_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flash_ms: default_flash_ms(),
            warning_ms: default_warning_ms(),
        }
    }
}

impl CaptureConfig {
    /// Flash duration.
    #[must_use]
    pub const fn flash(&self) -> Duration {
        Duration::from_millis(self.flash_ms)
    }

    /// Warning display time.
    #[must_use]
    pub const fn warning(&self) -> Duration {
        Duration::from_millis(self.warning_ms)
    }
}

const fn default_flash_ms() -> u64 {
    150
}

/// Clipboard monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClipboardConfig {
    /// Whether the detector runs.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Period of the opportunistic clipboard overwrite.
    #[serde(default = "default_clear_interval_ms")]
    pub clear_interval_ms: u64,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clear_interval_ms: default_clear_interval_ms(),
        }
    }
}

impl ClipboardConfig {
    /// Clear period.
    #[must_use]
    pub const fn clear_interval(&self) -> Duration {
        Duration::from_millis(self.clear_interval_ms)
    }
}

const fn default_clear_interval_ms() -> u64 {
    5_000
}

/// Pointer tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointerConfig {
    /// Whether the detector runs.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Idle window before an inactivity event.
    #[serde(default = "default_inactivity_ms")]
    pub inactivity_ms: u64,
    /// Edge dwell before an edge-loitering event.
    #[serde(default = "default_edge_dwell_ms")]
    pub edge_dwell_ms: u64,
    /// Distance from the viewport border that counts as "near the edge".
    #[serde(default = "default_edge_margin_px")]
    pub edge_margin_px: u32,
    /// How often cached timestamps are checked.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inactivity_ms: default_inactivity_ms(),
            edge_dwell_ms: default_edge_dwell_ms(),
            edge_margin_px: default_edge_margin_px(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PointerConfig {
    /// Inactivity window.
    #[must_use]
    pub const fn inactivity(&self) -> Duration {
        Duration::from_millis(self.inactivity_ms)
    }

    /// Edge dwell threshold.
    #[must_use]
    pub const fn edge_dwell(&self) -> Duration {
        Duration::from_millis(self.edge_dwell_ms)
    }

    /// Poll period.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

const fn default_inactivity_ms() -> u64 {
    30_000
}

const fn default_edge_dwell_ms() -> u64 {
    5_000
}

const fn default_edge_margin_px() -> u32 {
    16
}

const fn default_poll_interval_ms() -> u64 {
    500
}

/// Duplicate-session detector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuplicateConfig {
    /// Whether the detector runs.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Presence re-announcement period.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

impl DuplicateConfig {
    /// Heartbeat period.
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

const fn default_heartbeat_ms() -> u64 {
    2_000
}

/// Restricted-input guard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputGuardConfig {
    /// Whether the detector runs.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// How long the restricted-action warning stays visible.
    #[serde(default = "default_warning_ms")]
    pub warning_ms: u64,
}

impl Default for InputGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_ms: default_warning_ms(),
        }
    }
}

impl InputGuardConfig {
    /// Warning display time.
    #[must_use]
    pub const fn warning(&self) -> Duration {
        Duration::from_millis(self.warning_ms)
    }
}

/// Locked-down exam shell attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationConfig {
    /// Whether sessions may only start inside an approved shell.
    #[serde(default)]
    pub required: bool,

    /// Case-insensitive substrings of the user agent that identify the shell.
    #[serde(default = "default_user_agent_tokens")]
    pub user_agent_tokens: Vec<String>,

    /// Host-injected markers (header or global names) that identify the shell.
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,

    /// Display name of the shell on the instruction page.
    #[serde(default = "default_shell_name")]
    pub shell_name: String,

    /// Where candidates download the shell.
    #[serde(default = "default_download_url")]
    pub download_url: String,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            required: false,
            user_agent_tokens: default_user_agent_tokens(),
            markers: default_markers(),
            shell_name: default_shell_name(),
            download_url: default_download_url(),
        }
    }
}

fn default_user_agent_tokens() -> Vec<String> {
    vec!["SEB/".to_string(), "SafeExamBrowser".to_string()]
}

fn default_markers() -> Vec<String> {
    vec![
        "x-safeexambrowser-requesthash".to_string(),
        "x-safeexambrowser-configkeyhash".to_string(),
    ]
}

fn default_shell_name() -> String {
    "Safe Exam Browser".to_string()
}

fn default_download_url() -> String {
    "https://safeexambrowser.org/download_en.html".to_string()
}

/// Question generation pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Content-generation service endpoint. Without one every request is
    /// served from the fallback bank.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the service API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Budget for one generation call before falling back.
    #[serde(default = "default_generation_timeout_ms")]
    pub timeout_ms: u64,

    /// Questions per request when the caller gives no count.
    #[serde(default = "default_count")]
    pub default_count: usize,

    /// Largest count a caller may request.
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Token-set similarity at or above which two prompts are duplicates.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// How many recent sessions per candidate and career are avoided.
    #[serde(default = "default_history_sessions")]
    pub history_sessions: usize,

    /// Replacement fallback bank (JSON). The embedded bank is used otherwise.
    #[serde(default)]
    pub bank_path: Option<PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: None,
            timeout_ms: default_generation_timeout_ms(),
            default_count: default_count(),
            max_count: default_max_count(),
            similarity_threshold: default_similarity_threshold(),
            history_sessions: default_history_sessions(),
            bank_path: None,
        }
    }
}

impl GenerationConfig {
    /// Generation call budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

const fn default_generation_timeout_ms() -> u64 {
    15_000
}

const fn default_count() -> usize {
    10
}

const fn default_max_count() -> usize {
    20
}

const fn default_similarity_threshold() -> f64 {
    0.85
}

const fn default_history_sessions() -> usize {
    5
}

const fn enabled() -> bool {
    true
}
