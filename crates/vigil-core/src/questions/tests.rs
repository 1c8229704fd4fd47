//! Pipeline tests.
//!
//! These tests verify:
//! - Exactly the requested count of unique questions under any backend outcome
//! - Backend failure, timeout and malformed output fall back with a warning
//! - In-session and cross-session exclusion

#![allow(clippy::cast_possible_truncation)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use super::*;
use crate::config::GenerationConfig;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Clone)]
enum Script {
    Fail,
    Hang,
    Malformed,
    Questions(Vec<Question>),
}

#[derive(Debug)]
struct ScriptedGenerator {
    script: Script,
    calls: AtomicUsize,
    last_request: Mutex<Option<BackendRequest>>,
}

impl ScriptedGenerator {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }
}

#[async_trait]
impl QuestionGenerator for ScriptedGenerator {
    async fn generate(&self, request: &BackendRequest) -> Result<Vec<Question>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.script {
            Script::Fail => Err(GenerationError::backend("connection refused")),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            },
            Script::Malformed => Err(GenerationError::malformed("expected value at line 1")),
            Script::Questions(questions) => Ok(questions.clone()),
        }
    }
}

fn generated(id: &str, topic: usize) -> Question {
    Question {
        id: id.to_string(),
        prompt: format!("Generated question number {topic} about data cleaning"),
        options: ["one", "two", "three", "four"].map(str::to_string),
        correct_option_index: (topic % 4) as u8,
        difficulty: Difficulty::Beginner,
        tags: Vec::new(),
    }
}

fn pipeline_with(generator: Arc<dyn QuestionGenerator>) -> QuestionPipeline {
    let config = GenerationConfig::default();
    QuestionPipeline::new(&config, generator, FallbackBank::embedded(config.similarity_threshold).unwrap())
}

fn assert_well_formed(set: &GeneratedSet, count: usize, bank: &FallbackBank, difficulty: Difficulty) {
    assert_eq!(set.questions.len(), count);
    let ids: HashSet<_> = set.questions.iter().map(|q| q.id.as_str()).collect();
    assert_eq!(ids.len(), count, "ids repeat");
    let prompts: HashSet<_> = set
        .questions
        .iter()
        .map(|q| normalize_prompt(&q.prompt))
        .collect();
    assert_eq!(prompts.len(), count, "prompts repeat");
    let duplicates = bank.duplicate_ids(difficulty);
    assert!(set.questions.iter().all(|q| !duplicates.contains(&q.id)));
    assert!(set.questions.iter().all(|q| q.validate().is_ok()));
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn unreachable_backend_serves_ten_fallback_questions() {
    let generator = HttpQuestionGenerator::new(
        "http://127.0.0.1:9/generate-questions",
        None,
        Duration::from_secs(5),
    )
    .unwrap();
    let pipeline = pipeline_with(Arc::new(generator));
    let request = GenerationRequest::new("Data Analyst", Difficulty::Intermediate, 10);

    let set = pipeline.generate(&request).await.unwrap();
    assert_well_formed(&set, 10, pipeline.bank(), Difficulty::Intermediate);
    assert_eq!(set.source, QuestionSource::Fallback);
    assert!(set.warning.as_deref().unwrap().contains("fallback"));
    assert!(
        set.questions
            .iter()
            .all(|q| q.difficulty == Difficulty::Intermediate)
    );
}

#[tokio::test]
async fn unconfigured_backend_falls_back() {
    let pipeline = QuestionPipeline::from_config(&GenerationConfig::default()).unwrap();
    let set = pipeline
        .generate(&GenerationRequest::new("Project Manager", Difficulty::Advanced, 20))
        .await
        .unwrap();
    assert_well_formed(&set, 20, pipeline.bank(), Difficulty::Advanced);
    assert!(set.warning.is_some());
}

#[tokio::test(start_paused = true)]
async fn backend_timeout_falls_back() {
    let generator = ScriptedGenerator::new(Script::Hang);
    let pipeline = pipeline_with(generator.clone());
    let set = pipeline
        .generate(&GenerationRequest::new("Data Analyst", Difficulty::Beginner, 5))
        .await
        .unwrap();
    assert_eq!(set.source, QuestionSource::Fallback);
    assert!(set.warning.unwrap().contains("timed out after 15000 ms"));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_output_falls_back() {
    let pipeline = pipeline_with(ScriptedGenerator::new(Script::Malformed));
    let set = pipeline
        .generate(&GenerationRequest::new("Data Analyst", Difficulty::Beginner, 8))
        .await
        .unwrap();
    assert_eq!(set.source, QuestionSource::Fallback);
    assert!(set.warning.unwrap().contains("malformed"));
}

// ============================================================================
// Backend success
// ============================================================================

#[tokio::test]
async fn full_backend_answer_is_used_as_is() {
    let questions = (0..10).map(|i| generated(&format!("g-{i}"), i)).collect();
    let pipeline = pipeline_with(ScriptedGenerator::new(Script::Questions(questions)));
    let set = pipeline
        .generate(&GenerationRequest::new("Data Analyst", Difficulty::Advanced, 10))
        .await
        .unwrap();
    assert_eq!(set.source, QuestionSource::Generated);
    assert!(set.warning.is_none());
    assert!(set.questions.iter().all(|q| q.id.starts_with("g-")));
    assert!(set.questions.iter().all(|q| q.difficulty == Difficulty::Advanced));
}

#[tokio::test]
async fn short_backend_answer_is_topped_up() {
    let questions = vec![
        generated("g-1", 1),
        generated("g-1", 2),
        generated("", 3),
        generated("g-4", 1),
        generated("g-5", 5),
    ];
    let pipeline = pipeline_with(ScriptedGenerator::new(Script::Questions(questions)));
    let set = pipeline
        .generate(&GenerationRequest::new("Data Analyst", Difficulty::Intermediate, 10))
        .await
        .unwrap();
    assert_well_formed(&set, 10, pipeline.bank(), Difficulty::Intermediate);
    assert_eq!(set.source, QuestionSource::Mixed);
    assert!(set.warning.unwrap().contains("4 usable"));
    assert_eq!(
        set.questions
            .iter()
            .filter(|q| q.id.starts_with("gen-"))
            .count(),
        2
    );
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let pipeline = pipeline_with(Arc::new(UnavailableGenerator));
    for request in [
        GenerationRequest::new("Data Analyst", Difficulty::Beginner, 0),
        GenerationRequest::new("Data Analyst", Difficulty::Beginner, 21),
        GenerationRequest::new("  ", Difficulty::Beginner, 5),
    ] {
        assert!(matches!(
            pipeline.generate(&request).await,
            Err(GenerationError::InvalidRequest { .. })
        ));
    }
}

#[test]
fn difficulty_parses_only_wire_names() {
    assert_eq!("advanced".parse::<Difficulty>().unwrap(), Difficulty::Advanced);
    assert!("Advanced".parse::<Difficulty>().is_err());
    assert!(" beginner".parse::<Difficulty>().is_err());
    assert!("expert".parse::<Difficulty>().is_err());
    assert_eq!(Difficulty::Beginner.adjacent()[0], Difficulty::Intermediate);
}

// ============================================================================
// Exclusion
// ============================================================================

#[tokio::test]
async fn session_never_sees_a_question_twice() {
    let generator = ScriptedGenerator::new(Script::Fail);
    let pipeline = pipeline_with(generator.clone());
    let request = GenerationRequest::new("Data Analyst", Difficulty::Beginner, 10).for_session("sess-1");

    let first = pipeline.generate(&request).await.unwrap();
    let second = pipeline.generate(&request).await.unwrap();
    let first_ids: HashSet<_> = first.questions.iter().map(|q| q.id.clone()).collect();
    assert!(second.questions.iter().all(|q| !first_ids.contains(&q.id)));

    let forwarded = generator.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(forwarded.avoid_prompts.len(), 10);

    pipeline.forget_session("sess-1");
    let third = pipeline.generate(&request).await.unwrap();
    assert_eq!(third.questions.len(), 10);
}

#[tokio::test]
async fn candidate_history_is_avoided_then_relaxed() {
    let pipeline = pipeline_with(Arc::new(UnavailableGenerator));
    let first = pipeline
        .generate(
            &GenerationRequest::new("Data Analyst", Difficulty::Intermediate, 20)
                .for_session("s-1")
                .for_candidate("cand-7"),
        )
        .await
        .unwrap();
    let second = pipeline
        .generate(
            &GenerationRequest::new("Data Analyst", Difficulty::Intermediate, 20)
                .for_session("s-2")
                .for_candidate("cand-7"),
        )
        .await
        .unwrap();
    let first_ids: HashSet<_> = first.questions.iter().map(|q| q.id.clone()).collect();
    assert!(second.questions.iter().all(|q| !first_ids.contains(&q.id)));

    // The bank cannot keep avoiding history forever; later sessions still
    // get full, internally unique sets.
    for session in ["s-3", "s-4", "s-5"] {
        let set = pipeline
            .generate(
                &GenerationRequest::new("Data Analyst", Difficulty::Intermediate, 20)
                    .for_session(session)
                    .for_candidate("cand-7"),
            )
            .await
            .unwrap();
        assert_well_formed(&set, 20, pipeline.bank(), Difficulty::Intermediate);
    }
}

#[tokio::test]
async fn exhausted_session_is_an_error() {
    let pipeline = pipeline_with(Arc::new(UnavailableGenerator));
    let mut served = 0;
    loop {
        let request = GenerationRequest::new("Data Analyst", Difficulty::Beginner, 20).for_session("greedy");
        match pipeline.generate(&request).await {
            Ok(set) => served += set.questions.len(),
            Err(GenerationError::InsufficientQuestions { requested, available }) => {
                assert_eq!(requested, 20);
                assert_eq!(served + available, pipeline.bank().len());
                break;
            },
            Err(other) => panic!("unexpected error {other}"),
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

fn arb_script() -> impl Strategy<Value = Script> {
    prop_oneof![
        Just(Script::Fail),
        Just(Script::Hang),
        Just(Script::Malformed),
        prop::collection::vec((0usize..6, 0usize..12), 0..25).prop_map(|raw| {
            Script::Questions(
                raw.into_iter()
                    .map(|(id, topic)| generated(&format!("g-{id}"), topic))
                    .collect(),
            )
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_exact_count_of_unique_questions(
        script in arb_script(),
        count in 1usize..=20,
        difficulty in prop::sample::select(Difficulty::ALL.to_vec()),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let pipeline = pipeline_with(ScriptedGenerator::new(script));
        let set = runtime
            .block_on(pipeline.generate(&GenerationRequest::new("Data Analyst", difficulty, count)))
            .unwrap();
        assert_well_formed(&set, count, pipeline.bank(), difficulty);
        prop_assert!(set.questions.iter().all(|q| q.difficulty == difficulty || q.id.starts_with("bank-")));
    }
}
