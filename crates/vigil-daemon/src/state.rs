//! Shared handler state.

use std::sync::Arc;

use vigil_core::{QuestionPipeline, VigilConfig};

use crate::store::{EventStore, StoreError};

/// State shared by every request handler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<VigilConfig>,
    /// Ingested proctor events.
    pub events: Arc<EventStore>,
    /// Question generation pipeline.
    pub pipeline: Arc<QuestionPipeline>,
}

impl AppState {
    /// Assembles state from its parts.
    #[must_use]
    pub fn new(config: VigilConfig, events: EventStore, pipeline: QuestionPipeline) -> Self {
        Self {
            config: Arc::new(config),
            events: Arc::new(events),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Builds the event store and pipeline the configuration describes.
    pub fn from_config(config: VigilConfig) -> Result<Self, StartupError> {
        let events = match &config.server.event_journal {
            Some(path) => EventStore::open(config.server.max_events, path)?,
            None => EventStore::in_memory(config.server.max_events),
        };
        let pipeline = QuestionPipeline::from_config(&config.generation)?;
        Ok(Self::new(config, events, pipeline))
    }
}

/// Errors raised while assembling [`AppState`].
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The event journal could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The question pipeline could not be built.
    #[error("question pipeline: {0}")]
    Pipeline(#[from] vigil_core::GenerationError),
}
