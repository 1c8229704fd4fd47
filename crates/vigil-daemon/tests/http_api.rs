//! HTTP API tests driven through the router without a socket.

use std::collections::HashSet;
use std::io::Write;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use vigil_core::{Difficulty, VigilConfig};
use vigil_daemon::{AppState, router};

fn app(config: VigilConfig) -> (Router, AppState) {
    let state = AppState::from_config(config).unwrap();
    (router(state.clone()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, headers, body)
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn events_are_accepted_and_listed_per_session() {
    let (app, _) = app(VigilConfig::default());

    let (status, _, body) = send(
        &app,
        post(
            "/proctor-events",
            &json!({
                "type": "capture-attempt",
                "timestamp": "2024-05-01T10:00:00Z",
                "sessionId": "sess-1",
                "userEmail": "cand@example.com",
                "metadata": { "trigger": "print-screen" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let event_id = body["eventId"].as_str().unwrap().to_string();

    send(
        &app,
        post(
            "/proctor-events",
            &json!({ "type": "focus-loss", "timestamp": 1_714_557_600_000_i64, "sessionId": "sess-2" }),
        ),
    )
    .await;

    let (status, _, listing) = send(&app, get("/proctor-events?sessionId=sess-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["count"], 1);
    let event = &listing["events"][0];
    assert_eq!(event["eventId"], event_id.as_str());
    assert_eq!(event["type"], "capture-attempt");
    assert_eq!(event["userEmail"], "cand@example.com");
    assert_eq!(event["metadata"]["trigger"], "print-screen");

    let (_, _, all) = send(&app, get("/proctor-events")).await;
    assert_eq!(all["count"], 2);
}

#[tokio::test]
async fn events_missing_required_fields_are_rejected() {
    let (app, state) = app(VigilConfig::default());
    for body in [
        json!({ "timestamp": 0, "sessionId": "s" }),
        json!({ "type": "focus-loss", "sessionId": "s" }),
        json!({ "type": "focus-loss", "timestamp": 0 }),
        json!({ "type": "mind-reading", "timestamp": 0, "sessionId": "s" }),
    ] {
        let (status, _, response) = send(&app, post("/proctor-events", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {body}");
        assert_eq!(response["success"], false);
    }
    assert!(state.events.is_empty());
}

#[tokio::test]
async fn unreachable_backend_falls_back_with_a_warning() {
    let mut config = VigilConfig::default();
    config.generation.endpoint = Some("http://127.0.0.1:9/generate".to_string());
    let (app, state) = app(config);

    let (status, headers, body) = send(
        &app,
        post(
            "/generate-questions",
            &json!({ "careerPath": "Data Analyst", "difficulty": "intermediate", "count": 10 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 10);
    assert_eq!(body["source"], "fallback");
    assert!(body["warning"].is_string());

    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 10);
    let ids: HashSet<&str> = questions.iter().map(|q| q["id"].as_str().unwrap()).collect();
    assert_eq!(ids.len(), 10);
    let duplicates = state.pipeline.bank().duplicate_ids(Difficulty::Intermediate);
    assert!(ids.iter().all(|id| !duplicates.iter().any(|d| d == id)));
}

#[tokio::test]
async fn count_defaults_and_sessions_do_not_repeat() {
    let (app, _) = app(VigilConfig::default());
    let request = json!({
        "careerPath": "Software Engineer",
        "difficulty": "beginner",
        "sessionId": "sess-7"
    });

    let (_, _, first) = send(&app, post("/generate-questions", &request)).await;
    let (_, _, second) = send(&app, post("/generate-questions", &request)).await;
    assert_eq!(first["count"], 10);
    assert_eq!(second["count"], 10);

    let ids = |body: &Value| -> HashSet<String> {
        body["questions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|q| q["id"].as_str().unwrap().to_string())
            .collect()
    };
    assert!(ids(&first).is_disjoint(&ids(&second)));
}

#[tokio::test]
async fn invalid_generation_requests_are_rejected() {
    let (app, _) = app(VigilConfig::default());
    for body in [
        json!({ "difficulty": "beginner" }),
        json!({ "careerPath": "QA", "difficulty": "legendary" }),
        json!({ "careerPath": "QA", "difficulty": "Advanced" }),
        json!({ "careerPath": "QA" }),
        json!({ "careerPath": "QA", "difficulty": "beginner", "count": 0 }),
        json!({ "careerPath": "QA", "difficulty": "beginner", "count": 500 }),
    ] {
        let (status, _, _) = send(&app, post("/generate-questions", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "accepted {body}");
    }
}

#[tokio::test]
async fn exhausted_bank_is_a_server_error() {
    let mut bank = tempfile::NamedTempFile::new().unwrap();
    let prompts = [
        "What is a unit test?",
        "Which HTTP method creates a resource?",
        "Why keep code under version control?",
    ];
    let entries: Vec<Value> = prompts
        .iter()
        .enumerate()
        .map(|(i, prompt)| {
            json!({
                "id": format!("tiny-{i}"),
                "prompt": prompt,
                "options": ["a", "b", "c", "d"],
                "correctOptionIndex": 0,
                "difficulty": "beginner"
            })
        })
        .collect();
    write!(bank, "{}", json!({ "questions": entries })).unwrap();

    let mut config = VigilConfig::default();
    config.generation.bank_path = Some(bank.path().to_path_buf());
    let (app, _) = app(config);

    let (status, _, body) = send(
        &app,
        post(
            "/generate-questions",
            &json!({ "careerPath": "QA", "difficulty": "beginner", "count": 5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(!body["error"].as_str().unwrap().contains("tiny"));
}

#[tokio::test]
async fn exam_gate_blocks_outside_the_shell() {
    let mut config = VigilConfig::default();
    config.attestation.required = true;
    let (app, _) = app(config);

    let browser = Request::get("/exam-gate")
        .header(header::USER_AGENT, "Mozilla/5.0 Firefox/128.0")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, browser).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    assert!(body.as_str().unwrap().contains("safeexambrowser.org"));

    let shell = Request::get("/exam-gate")
        .header(header::USER_AGENT, "Mozilla/5.0 SEB/3.5")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, shell).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let marker = Request::get("/exam-gate")
        .header("X-SafeExamBrowser-RequestHash", "f00d")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, marker).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn exam_gate_is_open_when_not_required() {
    let (app, _) = app(VigilConfig::default());
    let (status, _, body) = send(&app, get("/exam-gate")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attestation"]["result"], "not-required");
}

#[tokio::test]
async fn journal_is_replayed_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = VigilConfig::default();
    config.server.event_journal = Some(dir.path().join("events.jsonl"));

    {
        let (app, _) = app(config.clone());
        let (status, _, _) = send(
            &app,
            post(
                "/proctor-events",
                &json!({ "type": "clipboard-use", "timestamp": 0, "sessionId": "sess-j" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (app, _) = app(config);
    let (_, _, listing) = send(&app, get("/proctor-events?sessionId=sess-j")).await;
    assert_eq!(listing["count"], 1);
}

#[tokio::test]
async fn health_lists_routes() {
    let (app, _) = app(VigilConfig::default());
    let (status, _, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("/generate-questions"));
}
