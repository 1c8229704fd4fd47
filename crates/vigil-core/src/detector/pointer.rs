//! Pointer tracker.
//!
//! Movement signals only update cached timestamps; a separate poll compares
//! those timestamps against the inactivity and edge-dwell thresholds, so each
//! check is constant time regardless of how busy the pointer is.
//!
//! Each idle stretch and each edge visit is reported at most once; moving the
//! pointer (or leaving the edge) re-arms the corresponding check.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::{ArmedSink, Detector, DetectorError, DetectorKind, EventSink, Listeners, next_signal};
use crate::config::PointerConfig;
use crate::event::ProctorEventType;
use crate::host::{HostSignal, IntegrityHost, Viewport};

fn duration_ms(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Which edge the pointer is dwelling at.
fn edge_of(x: f64, y: f64, viewport: Viewport, margin: f64) -> Option<&'static str> {
    if x <= margin {
        Some("left")
    } else if x >= viewport.width - margin {
        Some("right")
    } else if y <= margin {
        Some("top")
    } else if y >= viewport.height - margin {
        Some("bottom")
    } else {
        None
    }
}

struct PointerState {
    config: PointerConfig,
    viewport: Viewport,
    last_move: Instant,
    idle_reported: bool,
    edge: Option<(&'static str, Instant)>,
    loiter_reported: bool,
}

impl PointerState {
    fn new(config: PointerConfig, viewport: Viewport, now: Instant) -> Self {
        Self {
            config,
            viewport,
            last_move: now,
            idle_reported: false,
            edge: None,
            loiter_reported: false,
        }
    }

    fn observe(&mut self, signal: &HostSignal, now: Instant) {
        match signal {
            HostSignal::PointerMoved { x, y } => {
                self.last_move = now;
                self.idle_reported = false;
                let margin = f64::from(self.config.edge_margin_px);
                match edge_of(*x, *y, self.viewport, margin) {
                    Some(edge) => self.enter_edge(edge, now),
                    None => {
                        self.edge = None;
                        self.loiter_reported = false;
                    },
                }
            },
            HostSignal::PointerLeftViewport => self.enter_edge("outside", now),
            HostSignal::ViewportResized { width, height } => {
                self.viewport = Viewport::new(*width, *height);
            },
            _ => {},
        }
    }

    fn enter_edge(&mut self, edge: &'static str, now: Instant) {
        match &mut self.edge {
            // Sliding along the border keeps the original dwell start.
            Some((current, _)) => *current = edge,
            None => {
                self.edge = Some((edge, now));
                self.loiter_reported = false;
            },
        }
    }

    fn check(&mut self, now: Instant, emitter: &ArmedSink) {
        let idle = now.saturating_duration_since(self.last_move);
        if !self.idle_reported && idle >= self.config.inactivity() {
            self.idle_reported = true;
            emitter.emit(
                emitter
                    .event(ProctorEventType::PointerInactivity)
                    .with_meta("idleMs", duration_ms(idle)),
            );
        }

        if let Some((edge, since)) = self.edge {
            let dwell = now.saturating_duration_since(since);
            if !self.loiter_reported && dwell >= self.config.edge_dwell() {
                self.loiter_reported = true;
                emitter.emit(
                    emitter
                        .event(ProctorEventType::PointerEdgeLoitering)
                        .with_meta("edge", edge)
                        .with_meta("dwellMs", duration_ms(dwell)),
                );
            }
        }
    }
}

/// Tracks pointer inactivity and edge loitering.
pub struct PointerTracker {
    config: PointerConfig,
    host: Arc<dyn IntegrityHost>,
    sink: EventSink,
    listeners: Option<Listeners>,
}

impl PointerTracker {
    /// Creates a stopped tracker.
    #[must_use]
    pub fn new(config: PointerConfig, host: Arc<dyn IntegrityHost>, sink: EventSink) -> Self {
        Self {
            config,
            host,
            sink,
            listeners: None,
        }
    }
}

impl Detector for PointerTracker {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Pointer
    }

    fn start(&mut self) -> Result<(), DetectorError> {
        if self.listeners.is_some() {
            return Ok(());
        }
        let mut listeners = Listeners::new(self.kind());
        let emitter = listeners.emitter(&self.sink);
        let mut signals = self.host.subscribe();
        let mut state = PointerState::new(self.config.clone(), self.host.viewport(), Instant::now());
        let period = self.config.poll_interval();

        listeners.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    signal = next_signal(&mut signals) => match signal {
                        Some(signal) => state.observe(&signal, Instant::now()),
                        None => break,
                    },
                    _ = ticker.tick() => state.check(Instant::now(), &emitter),
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
