//! Shared fixtures for unit tests.

use chrono::Utc;

use crate::questions::{Difficulty, Question};
use crate::session::SessionContext;

pub(crate) fn sample_questions(n: usize) -> Vec<Question> {
    (0..n)
        .map(|i| Question {
            id: format!("q-{i}"),
            prompt: format!("Sample prompt {i}"),
            options: ["a", "b", "c", "d"].map(str::to_string),
            correct_option_index: 0,
            difficulty: Difficulty::Intermediate,
            tags: Vec::new(),
        })
        .collect()
}

/// An active session with three questions and default policy capacity.
pub(crate) fn active_context(session_id: &str) -> SessionContext {
    let ctx = SessionContext::new(
        session_id,
        Some("cand@example.com".to_string()),
        "Data Analyst",
        Difficulty::Intermediate,
        50,
    );
    ctx.lifecycle()
        .activate(sample_questions(3), Utc::now())
        .unwrap();
    ctx
}
