//! Event reporting.
//!
//! Every event accepted by the aggregator is handed to an [`EventReporter`].
//! Reporting is fire-and-forget: `report` returns immediately and a failing
//! backend never stalls or fails the session.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::event::ProctorEvent;

/// Non-blocking event sink.
pub trait EventReporter: Send + Sync {
    /// Hands an event over. Must not block and must not fail.
    fn report(&self, event: &ProctorEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl EventReporter for NullReporter {
    fn report(&self, _event: &ProctorEvent) {}
}

/// Keeps every reported event in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<ProctorEvent>>,
}

impl MemoryReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events reported so far.
    #[must_use]
    pub fn events(&self) -> Vec<ProctorEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventReporter for MemoryReporter {
    fn report(&self, event: &ProctorEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Posts each event to the ingestion endpoint from a spawned task.
#[derive(Debug, Clone)]
pub struct HttpEventReporter {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpEventReporter {
    /// Creates a reporter posting to `endpoint`
    /// (for example `http://127.0.0.1:8787/proctor-events`).
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
        })
    }
}

impl EventReporter for HttpEventReporter {
    fn report(&self, event: &ProctorEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(kind = %event.kind(), "no runtime; event report dropped");
            return;
        };
        let request = self
            .http_client
            .post(&self.endpoint)
            .header("User-Agent", "vigil-core/event-reporter")
            .json(event);
        let kind = event.kind();
        let session_id = event.session_id().to_string();
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {},
                Ok(response) => {
                    warn!(
                        %session_id,
                        %kind,
                        status = response.status().as_u16(),
                        "event report rejected"
                    );
                },
                Err(e) => {
                    warn!(%session_id, %kind, error = %e, "event report failed");
                },
            }
        });
    }
}
