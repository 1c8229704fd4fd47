//! Generation backends.
//!
//! The pipeline talks to an external question source through
//! [`QuestionGenerator`]. The HTTP backend posts a JSON request and parses a
//! JSON question list; entries that break the question rules are dropped
//! individually instead of failing the whole response.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Difficulty, GenerationError, OPTION_COUNT, Question};

/// What the backend is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    /// Career path the questions target.
    pub career_path: String,
    /// Requested difficulty.
    pub difficulty: Difficulty,
    /// Number of questions wanted.
    pub count: usize,
    /// Prompts the backend should not repeat.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub avoid_prompts: Vec<String>,
}

/// A source of freshly generated questions.
///
/// Returned questions may have an empty id; the pipeline assigns one.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Asks the backend for questions.
    async fn generate(&self, request: &BackendRequest) -> Result<Vec<Question>, GenerationError>;
}

/// Stand-in used when no backend is configured; always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGenerator;

#[async_trait]
impl QuestionGenerator for UnavailableGenerator {
    async fn generate(&self, _request: &BackendRequest) -> Result<Vec<Question>, GenerationError> {
        Err(GenerationError::Unavailable)
    }
}

#[derive(Debug, Deserialize)]
struct BackendResponse {
    questions: Vec<BackendQuestion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendQuestion {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "question")]
    prompt: String,
    options: Vec<String>,
    #[serde(alias = "correctAnswer")]
    correct_option_index: i64,
    #[serde(default)]
    tags: Vec<String>,
}

impl BackendQuestion {
    fn into_question(self, difficulty: Difficulty) -> Result<Question, String> {
        let options: [String; OPTION_COUNT] = self
            .options
            .try_into()
            .map_err(|options: Vec<String>| format!("expected 4 options, got {}", options.len()))?;
        let correct_option_index = u8::try_from(self.correct_option_index)
            .map_err(|_| format!("correct option index {} out of range", self.correct_option_index))?;
        let question = Question {
            id: self.id.unwrap_or_default(),
            prompt: self.prompt.trim().to_string(),
            options,
            correct_option_index,
            difficulty,
            tags: self.tags,
        };
        question.validate()?;
        Ok(question)
    }
}

/// Parses a backend response body, dropping invalid entries.
pub(crate) fn parse_response(body: &str, difficulty: Difficulty) -> Result<Vec<Question>, GenerationError> {
    let response: BackendResponse = serde_json::from_str(body).map_err(GenerationError::malformed)?;
    let received = response.questions.len();
    let questions: Vec<Question> = response
        .questions
        .into_iter()
        .filter_map(|raw| match raw.into_question(difficulty) {
            Ok(question) => Some(question),
            Err(reason) => {
                debug!(%reason, "dropping generated question");
                None
            },
        })
        .collect();
    if questions.len() < received {
        warn!(
            received,
            usable = questions.len(),
            "generation backend returned invalid questions"
        );
    }
    Ok(questions)
}

/// Generation backend reached over HTTP.
#[derive(Debug)]
pub struct HttpQuestionGenerator {
    endpoint: String,
    api_key: Option<SecretString>,
    http_client: reqwest::Client,
}

impl HttpQuestionGenerator {
    /// Creates a client for `endpoint`.
    ///
    /// The pipeline enforces its own deadline; `request_timeout` only bounds
    /// a request that outlives the pipeline.
    ///
    /// # Errors
    ///
    /// Fails on an empty endpoint or when the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(GenerationError::invalid("generation endpoint must not be empty"));
        }
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout)
            .build()
            .map_err(GenerationError::backend)?;
        Ok(Self {
            endpoint,
            api_key,
            http_client,
        })
    }

    /// Reads the API key from the environment variable `name`, if set.
    #[must_use]
    pub fn api_key_from_env(name: &str) -> Option<SecretString> {
        std::env::var(name)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(SecretString::from)
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(&self, request: &BackendRequest) -> Result<Vec<Question>, GenerationError> {
        let mut builder = self
            .http_client
            .post(&self.endpoint)
            .header("User-Agent", "vigil-core/question-generator")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(GenerationError::backend)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::backend(format!("status {}", status.as_u16())));
        }
        let body = response.text().await.map_err(GenerationError::backend)?;
        parse_response(&body, request.difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BackendRequest {
        BackendRequest {
            career_path: "Data Analyst".to_string(),
            difficulty: Difficulty::Intermediate,
            count: 3,
            avoid_prompts: vec!["What is a join?".to_string()],
        }
    }

    #[test]
    fn request_uses_camel_case() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["careerPath"], "Data Analyst");
        assert_eq!(json["difficulty"], "intermediate");
        assert_eq!(json["avoidPrompts"][0], "What is a join?");
    }

    #[test]
    fn invalid_entries_are_dropped_individually() {
        let body = r#"{"questions": [
            {"id": "g-1", "prompt": "What does a pivot table summarise?",
             "options": ["Rows", "Aggregates", "Macros", "Charts"], "correctOptionIndex": 1},
            {"prompt": "Three options only", "options": ["a", "b", "c"], "correctOptionIndex": 0},
            {"prompt": "Index too large", "options": ["a", "b", "c", "d"], "correctOptionIndex": 4},
            {"prompt": "   ", "options": ["a", "b", "c", "d"], "correctOptionIndex": 0},
            {"question": "Which chart shows a distribution?",
             "options": ["Histogram", "Pie", "Gauge", "Map"], "correctAnswer": 0, "tags": ["charts"]}
        ]}"#;
        let questions = parse_response(body, Difficulty::Intermediate).unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].id, "g-1");
        assert_eq!(questions[1].id, "");
        assert_eq!(questions[1].tags, vec!["charts"]);
        assert!(questions.iter().all(|q| q.difficulty == Difficulty::Intermediate));
    }

    #[test]
    fn non_list_output_is_malformed() {
        let err = parse_response("Sure! Here are some questions:", Difficulty::Beginner).unwrap_err();
        assert!(matches!(err, GenerationError::MalformedOutput { .. }));
    }

    #[test]
    fn negative_index_is_dropped() {
        let body = r#"{"questions": [{"prompt": "p", "options": ["a","b","c","d"], "correctOptionIndex": -1}]}"#;
        assert!(parse_response(body, Difficulty::Beginner).unwrap().is_empty());
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(matches!(
            HttpQuestionGenerator::new(" ", None, Duration::from_secs(1)),
            Err(GenerationError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn unavailable_generator_fails() {
        assert_eq!(
            UnavailableGenerator.generate(&request()).await,
            Err(GenerationError::Unavailable)
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_backend_error() {
        let generator =
            HttpQuestionGenerator::new("http://127.0.0.1:9/generate", None, Duration::from_secs(2))
                .unwrap();
        let err = generator.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Backend { .. }));
    }
}
