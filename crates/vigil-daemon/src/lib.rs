#![warn(missing_docs)]

//! vigil-daemon - HTTP surface of the proctored assessment engine
//!
//! Serves event ingestion for the reporting sink, question generation, and
//! the exam-shell gate.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /` | health text |
//! | `POST /proctor-events` | accept one integrity event |
//! | `GET /proctor-events?sessionId=` | list accepted events |
//! | `POST /generate-questions` | assemble a question set (never cached) |
//! | `GET /exam-gate` | attest the requesting environment |

pub mod error;
pub mod gate_page;
pub mod handlers;
pub mod state;
pub mod store;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use state::{AppState, StartupError};
pub use store::{EventStore, StoreError, StoredEvent};

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route(
            "/proctor-events",
            post(handlers::ingest_event).get(handlers::list_events),
        )
        .route("/generate-questions", post(handlers::generate_questions))
        .route("/exam-gate", get(handlers::exam_gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
