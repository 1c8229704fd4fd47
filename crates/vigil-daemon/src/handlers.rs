//! Request handlers.
//!
//! Bodies are taken as raw bytes and validated field by field so every
//! malformed request gets a 400 naming the offending field, rather than the
//! extractor's generic rejection.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use vigil_core::host::EnvironmentFingerprint;
use vigil_core::{
    Difficulty, GenerationRequest, ProctorEvent, ProctorEventType, Question, QuestionSource, attest,
};

use crate::error::ApiError;
use crate::gate_page;
use crate::state::AppState;
use crate::store::StoredEvent;

const NO_STORE: [(header::HeaderName, &str); 1] = [(header::CACHE_CONTROL, "no-store")];

fn object(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ApiError::invalid("body must be a JSON object")),
        Err(e) => Err(ApiError::invalid(format!("body is not valid JSON: {e}"))),
    }
}

fn required_string(fields: &Map<String, Value>, name: &str) -> Result<String, ApiError> {
    match fields.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        None | Some(Value::Null) => Err(ApiError::invalid(format!("{name} is required"))),
        Some(_) => Err(ApiError::invalid(format!("{name} must be a non-empty string"))),
    }
}

fn optional_string(fields: &Map<String, Value>, name: &str) -> Result<Option<String>, ApiError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ApiError::invalid(format!("{name} must be a string"))),
    }
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn timestamp(value: &Value) -> Result<DateTime<Utc>, ApiError> {
    let parsed = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ApiError::invalid("timestamp must be an RFC 3339 string or epoch milliseconds")
    })
}

pub(crate) fn parse_event(body: &[u8]) -> Result<ProctorEvent, ApiError> {
    let mut fields = object(body)?;

    let kind = required_string(&fields, "type")?;
    let kind: ProctorEventType = kind
        .parse()
        .map_err(|e: vigil_core::event::UnknownEventType| ApiError::UnknownEventType(e.0))?;
    let timestamp = match fields.get("timestamp") {
        None | Some(Value::Null) => return Err(ApiError::invalid("timestamp is required")),
        Some(value) => timestamp(value)?,
    };
    let session_id = required_string(&fields, "sessionId")?;
    let user = optional_string(&fields, "userEmail")?;
    let metadata = match fields.remove("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(metadata)) => metadata,
        Some(_) => return Err(ApiError::invalid("metadata must be an object")),
    };

    Ok(ProctorEvent::at(kind, session_id, timestamp)
        .with_user(user)
        .with_metadata(metadata))
}

/// `POST /proctor-events`
pub async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let event = parse_event(&body)?;
    let stored = state.events.append(event)?;
    debug!(
        event_id = %stored.event_id,
        session_id = %stored.event.session_id(),
        kind = %stored.event.kind(),
        "event accepted"
    );
    Ok(Json(json!({ "success": true, "eventId": stored.event_id })))
}

/// Query string of `GET /proctor-events`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    /// Restricts the listing to one session.
    session_id: Option<String>,
}

/// Body of `GET /proctor-events`.
#[derive(Debug, Serialize)]
pub struct EventListing {
    events: Vec<StoredEvent>,
    count: usize,
}

/// `GET /proctor-events`
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Json<EventListing> {
    let events = state.events.query(query.session_id.as_deref());
    Json(EventListing {
        count: events.len(),
        events,
    })
}

pub(crate) fn parse_generation(
    body: &[u8],
    default_count: usize,
) -> Result<GenerationRequest, ApiError> {
    let fields = object(body)?;

    let career_path = required_string(&fields, "careerPath")?;
    let difficulty: Difficulty = required_string(&fields, "difficulty")?
        .parse()
        .map_err(|_| ApiError::invalid("difficulty must be beginner, intermediate or advanced"))?;
    let count = match fields.get("count") {
        None | Some(Value::Null) => default_count,
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ApiError::invalid("count must be a positive integer"))?,
    };

    Ok(GenerationRequest {
        career_path,
        difficulty,
        count,
        session_id: optional_string(&fields, "sessionId")?,
        candidate_id: optional_string(&fields, "candidateId")?,
    })
}

/// Body of a successful `POST /generate-questions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsResponse {
    success: bool,
    questions: Vec<Question>,
    count: usize,
    source: QuestionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

/// `POST /generate-questions`
///
/// Backend failures still answer 200 with bank questions and a `warning`.
pub async fn generate_questions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = parse_generation(&body, state.config.generation.default_count)?;
    let set = state.pipeline.generate(&request).await?;
    info!(
        career_path = %request.career_path,
        difficulty = %request.difficulty,
        count = set.questions.len(),
        source = ?set.source,
        "questions served"
    );
    let body = QuestionsResponse {
        success: true,
        count: set.questions.len(),
        questions: set.questions,
        source: set.source,
        warning: set.warning,
    };
    Ok((NO_STORE, Json(body)).into_response())
}

/// Builds an environment fingerprint from request headers: the user agent
/// plus every header name, so injected shell headers act as markers.
fn fingerprint(headers: &HeaderMap) -> EnvironmentFingerprint {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    headers
        .keys()
        .fold(EnvironmentFingerprint::new(user_agent), |fp, name| {
            fp.with_marker(name.as_str())
        })
}

/// `GET /exam-gate`
pub async fn exam_gate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let attestation = attest(&state.config.attestation, &fingerprint(&headers));
    if attestation.permits_start() {
        return (
            NO_STORE,
            Json(json!({ "allowed": true, "attestation": attestation })),
        )
            .into_response();
    }
    debug!("exam gate refused an unapproved environment");
    let page = gate_page::render(
        &state.config.attestation.shell_name,
        &state.config.attestation.download_url,
    );
    (StatusCode::FORBIDDEN, NO_STORE, Html(page)).into_response()
}

/// `GET /`
pub async fn health() -> &'static str {
    "vigil-daemon\n\n\
     POST /proctor-events      - report an integrity event\n\
     GET  /proctor-events      - list events (?sessionId=)\n\
     POST /generate-questions  - assemble a question set\n\
     GET  /exam-gate           - check the exam environment\n"
}
