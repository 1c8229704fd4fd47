//! Clipboard monitor.
//!
//! Copy, cut and paste attempts are suppressed and reported. Independently, a
//! fixed-period task opportunistically overwrites the system clipboard; host
//! refusals on that path are swallowed.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::trace;

use super::{Detector, DetectorError, DetectorKind, EventSink, Listeners, next_signal};
use crate::config::ClipboardConfig;
use crate::event::ProctorEventType;
use crate::host::{BlockedAction, HostSignal, IntegrityHost};

/// Reports clipboard use and keeps the clipboard empty.
pub struct ClipboardMonitor {
    config: ClipboardConfig,
    host: Arc<dyn IntegrityHost>,
    sink: EventSink,
    listeners: Option<Listeners>,
}

impl ClipboardMonitor {
    /// Creates a stopped monitor.
    #[must_use]
    pub fn new(config: ClipboardConfig, host: Arc<dyn IntegrityHost>, sink: EventSink) -> Self {
        Self {
            config,
            host,
            sink,
            listeners: None,
        }
    }
}

/// Overwrites non-empty clipboard contents. Every failure is ignored.
fn clear_clipboard(host: &dyn IntegrityHost) {
    match host.read_clipboard() {
        Ok(Some(text)) if !text.is_empty() => {
            if let Err(e) = host.write_clipboard("") {
                trace!(error = %e, "clipboard overwrite refused");
            }
        },
        Ok(_) => {},
        Err(e) => trace!(error = %e, "clipboard read refused"),
    }
}

impl Detector for ClipboardMonitor {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Clipboard
    }

    fn start(&mut self) -> Result<(), DetectorError> {
        if self.listeners.is_some() {
            return Ok(());
        }
        let mut listeners = Listeners::new(self.kind());
        for action in [BlockedAction::Copy, BlockedAction::Cut, BlockedAction::Paste] {
            listeners.block(&self.host, action);
        }

        let emitter = listeners.emitter(&self.sink);
        let mut signals = self.host.subscribe();
        listeners.spawn(async move {
            while let Some(signal) = next_signal(&mut signals).await {
                let action = match signal {
                    HostSignal::Copy => "copy",
                    HostSignal::Cut => "cut",
                    HostSignal::Paste => "paste",
                    _ => continue,
                };
                emitter.emit(
                    emitter
                        .event(ProctorEventType::ClipboardUse)
                        .with_meta("action", action),
                );
            }
        })?;

        let host = Arc::clone(&self.host);
        let period = self.config.clear_interval();
        listeners.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                clear_clipboard(host.as_ref());
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::detector::test_support::{drain, rig, settle};

    #[tokio::test(start_paused = true)]
    async fn copy_cut_paste_are_reported_and_suppressed() {
        let mut r = rig();
        let mut monitor = ClipboardMonitor::new(ClipboardConfig::default(), r.dyn_host.clone(), r.sink.clone());
        monitor.start().unwrap();
        assert!(r.host.is_blocked(&BlockedAction::Copy));
        assert!(r.host.is_blocked(&BlockedAction::Cut));

        r.host.send(HostSignal::Copy);
        r.host.send(HostSignal::Cut);
        r.host.send(HostSignal::Paste);
        r.host.send(HostSignal::ContextMenu);
        settle().await;

        let actions: Vec<_> = drain(&mut r.rx)
            .iter()
            .map(|e| {
                assert_eq!(e.kind(), ProctorEventType::ClipboardUse);
                e.metadata()["action"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(actions, vec!["copy", "cut", "paste"]);
    }

    #[tokio::test(start_paused = true)]
    async fn clipboard_is_overwritten_on_each_interval() {
        let r = rig();
        r.host.set_clipboard(Some("answer key"));
        let mut monitor = ClipboardMonitor::new(ClipboardConfig::default(), r.dyn_host.clone(), r.sink.clone());
        monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(r.host.clipboard().as_deref(), Some("answer key"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(r.host.clipboard(), None);
        assert_eq!(r.host.clipboard_writes(), vec![String::new()]);

        // An empty clipboard is left alone.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(r.host.clipboard_writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denial_is_swallowed() {
        let mut r = rig();
        r.host.set_clipboard(Some("notes"));
        r.host.deny_clipboard(true);
        let mut monitor = ClipboardMonitor::new(ClipboardConfig::default(), r.dyn_host.clone(), r.sink.clone());
        monitor.start().unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(monitor.is_running());
        assert!(drain(&mut r.rx).is_empty());
        assert_eq!(r.host.clipboard().as_deref(), Some("notes"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_events_or_overwrites_after_stop() {
        let mut r = rig();
        r.host.set_clipboard(Some("notes"));
        let mut monitor = ClipboardMonitor::new(ClipboardConfig::default(), r.dyn_host.clone(), r.sink.clone());
        monitor.start().unwrap();
        monitor.stop();

        r.host.send(HostSignal::Copy);
        tokio::time::sleep(Duration::from_secs(20)).await;
        settle().await;

        assert!(drain(&mut r.rx).is_empty());
        assert!(r.host.clipboard_writes().is_empty());
        assert!(!r.host.is_blocked(&BlockedAction::Copy));
    }
}
