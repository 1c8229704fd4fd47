//! Production host fed by an exam shell over a line-delimited JSON stream.
//!
//! The shell writes one [`HostSignal`] per line to the reader side and reads
//! one [`HostCommand`] per line from the writer side. Viewport, environment
//! and clipboard state are cached from the signal stream, so every capability
//! query is answered without a round trip.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    BlockedAction, EnvironmentFingerprint, HostError, HostSignal, IntegrityHost,
    SIGNAL_CHANNEL_CAPACITY, Viewport,
};

/// A presentation or clipboard command sent to the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum HostCommand {
    /// Render the opaque overlay.
    Flash {
        /// Overlay duration in milliseconds.
        duration_ms: u64,
    },
    /// Show a transient warning.
    Warning {
        /// Warning text.
        message: String,
        /// Display duration in milliseconds.
        duration_ms: u64,
    },
    /// Overwrite the clipboard.
    WriteClipboard {
        /// Replacement text.
        text: String,
    },
    /// Suppress or release a default action.
    Block {
        /// The action.
        action: BlockedAction,
        /// `true` to suppress.
        blocked: bool,
    },
}

#[derive(Debug)]
struct RelayCache {
    viewport: Viewport,
    environment: EnvironmentFingerprint,
    // Outer `None`: the shell never reported the clipboard, so reads are not
    // permitted.
    clipboard: Option<Option<String>>,
}

/// Host backed by an exam shell's signal stream.
#[derive(Debug)]
pub struct RelayHost {
    signals: broadcast::Sender<HostSignal>,
    commands: mpsc::UnboundedSender<HostCommand>,
    cache: Arc<Mutex<RelayCache>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHost {
    /// Starts relaying signals from `reader` and commands to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Unavailable`] when called outside a tokio runtime.
    pub fn spawn<R, W>(
        reader: R,
        writer: W,
        viewport: Viewport,
        environment: EnvironmentFingerprint,
    ) -> Result<Self, HostError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| HostError::unavailable("relay", e.to_string()))?;

        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(Mutex::new(RelayCache {
            viewport,
            environment,
            clipboard: None,
        }));

        let read_task = runtime.spawn(read_signals(reader, signals.clone(), Arc::clone(&cache)));
        let write_task = runtime.spawn(write_commands(writer, command_rx));

        Ok(Self {
            signals,
            commands,
            cache,
            tasks: vec![read_task, write_task],
        })
    }

    fn cache(&self) -> MutexGuard<'_, RelayCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: HostCommand) {
        if self.commands.send(command).is_err() {
            debug!("relay writer closed, dropping host command");
        }
    }
}

impl Drop for RelayHost {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn read_signals<R>(
    reader: R,
    signals: broadcast::Sender<HostSignal>,
    cache: Arc<Mutex<RelayCache>>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "relay signal stream failed");
                break;
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let signal: HostSignal = match serde_json::from_str(&line) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "ignoring malformed host signal");
                continue;
            },
        };
        {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            match &signal {
                HostSignal::ViewportResized { width, height } => {
                    cache.viewport = Viewport::new(*width, *height);
                },
                HostSignal::EnvironmentChanged { fingerprint } => {
                    cache.environment = fingerprint.clone();
                },
                HostSignal::ClipboardContents { text } => cache.clipboard = Some(text.clone()),
                _ => {},
            }
        }
        let _ = signals.send(signal);
    }
    debug!("relay signal stream ended");
}

async fn write_commands<W>(mut writer: W, mut commands: mpsc::UnboundedReceiver<HostCommand>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode host command");
                continue;
            },
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "relay command stream failed");
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "relay command stream failed");
            break;
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl IntegrityHost for RelayHost {
    fn subscribe(&self) -> broadcast::Receiver<HostSignal> {
        self.signals.subscribe()
    }

    fn viewport(&self) -> Viewport {
        self.cache().viewport
    }

    fn environment(&self) -> EnvironmentFingerprint {
        self.cache().environment.clone()
    }

    fn read_clipboard(&self) -> Result<Option<String>, HostError> {
        self.cache()
            .clipboard
            .clone()
            .ok_or_else(|| HostError::denied("clipboard-read"))
    }

    fn write_clipboard(&self, text: &str) -> Result<(), HostError> {
        self.send(HostCommand::WriteClipboard {
            text: text.to_string(),
        });
        let mut cache = self.cache();
        if cache.clipboard.is_some() {
            cache.clipboard = Some(Some(text.to_string()).filter(|t| !t.is_empty()));
        }
        Ok(())
    }

    fn flash_overlay(&self, duration: Duration) {
        self.send(HostCommand::Flash {
            duration_ms: millis(duration),
        });
    }

    fn show_warning(&self, message: &str, duration: Duration) {
        self.send(HostCommand::Warning {
            message: message.to_string(),
            duration_ms: millis(duration),
        });
    }

    fn set_default_blocked(&self, action: &BlockedAction, blocked: bool) {
        self.send(HostCommand::Block {
            action: action.clone(),
            blocked,
        });
    }
}
