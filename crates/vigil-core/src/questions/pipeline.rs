//! Backend-first, bank-backed question assembly.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    BackendRequest, FallbackBank, GenerationError, GenerationRequest, HttpQuestionGenerator,
    Question, QuestionGenerator, QuestionHistory, SeenQuestions, UnavailableGenerator,
};
use crate::config::GenerationConfig;

/// Cap on prompts forwarded to the backend as "avoid" hints.
const MAX_AVOID_PROMPTS: usize = 50;

/// Where a generated set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionSource {
    /// Every question came from the backend.
    Generated,
    /// Backend questions topped up from the bank.
    Mixed,
    /// Every question came from the bank.
    Fallback,
}

/// Result of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedSet {
    /// Exactly the requested number of unique questions.
    pub questions: Vec<Question>,
    /// Where they came from.
    pub source: QuestionSource,
    /// Non-fatal explanation when the backend fell short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// The question generation pipeline.
pub struct QuestionPipeline {
    generator: Arc<dyn QuestionGenerator>,
    bank: FallbackBank,
    history: QuestionHistory,
    timeout: Duration,
    max_count: usize,
    similarity_threshold: f64,
}

impl std::fmt::Debug for QuestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionPipeline")
            .field("bank", &self.bank.len())
            .field("timeout", &self.timeout)
            .field("max_count", &self.max_count)
            .finish_non_exhaustive()
    }
}

impl QuestionPipeline {
    /// Assembles a pipeline from explicit parts.
    #[must_use]
    pub fn new(config: &GenerationConfig, generator: Arc<dyn QuestionGenerator>, bank: FallbackBank) -> Self {
        Self {
            generator,
            bank,
            history: QuestionHistory::new(config.history_sessions),
            timeout: config.timeout(),
            max_count: config.max_count,
            similarity_threshold: config.similarity_threshold,
        }
    }

    /// Builds the backend and bank described by `config`.
    ///
    /// Without an endpoint every request is served from the bank.
    ///
    /// # Errors
    ///
    /// Fails if the bank cannot be loaded or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let generator: Arc<dyn QuestionGenerator> = match &config.endpoint {
            Some(endpoint) => {
                let api_key = config
                    .api_key_env
                    .as_deref()
                    .and_then(HttpQuestionGenerator::api_key_from_env);
                Arc::new(HttpQuestionGenerator::new(
                    endpoint.clone(),
                    api_key,
                    config.timeout() + Duration::from_secs(5),
                )?)
            },
            None => Arc::new(UnavailableGenerator),
        };
        let bank = match &config.bank_path {
            Some(path) => FallbackBank::from_file(path, config.similarity_threshold)?,
            None => FallbackBank::embedded(config.similarity_threshold)?,
        };
        Ok(Self::new(config, generator, bank))
    }

    /// The fallback bank.
    #[must_use]
    pub const fn bank(&self) -> &FallbackBank {
        &self.bank
    }

    /// Largest accepted count.
    #[must_use]
    pub const fn max_count(&self) -> usize {
        self.max_count
    }

    /// Clears the in-session used-question ledger.
    pub fn forget_session(&self, session_id: &str) {
        self.history.clear_session(session_id);
    }

    fn exclusions(&self, request: &GenerationRequest, with_history: bool) -> SeenQuestions {
        let mut seen = SeenQuestions::new(self.similarity_threshold);
        if let Some(session_id) = &request.session_id {
            for used in self.history.used_in_session(session_id) {
                seen.insert_parts(&used.id, &used.prompt);
            }
        }
        if with_history {
            if let Some(candidate_id) = &request.candidate_id {
                for used in self.history.recent_for(candidate_id, &request.career_path) {
                    seen.insert_parts(&used.id, &used.prompt);
                }
            }
        }
        seen
    }

    fn avoid_prompts(&self, request: &GenerationRequest) -> Vec<String> {
        let mut prompts: Vec<String> = request
            .session_id
            .iter()
            .flat_map(|s| self.history.used_in_session(s))
            .chain(
                request
                    .candidate_id
                    .iter()
                    .flat_map(|c| self.history.recent_for(c, &request.career_path)),
            )
            .map(|used| used.prompt)
            .collect();
        prompts.dedup();
        prompts.truncate(MAX_AVOID_PROMPTS);
        prompts
    }

    async fn call_backend(&self, request: &GenerationRequest) -> Result<Vec<Question>, GenerationError> {
        let backend_request = BackendRequest {
            career_path: request.career_path.clone(),
            difficulty: request.difficulty,
            count: request.count,
            avoid_prompts: self.avoid_prompts(request),
        };
        match tokio::time::timeout(self.timeout, self.generator.generate(&backend_request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Produces exactly `request.count` unique questions.
    ///
    /// Backend failure, timeout or malformed output never fail the request;
    /// the shortfall is filled from the bank and a warning is attached.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an empty career path or a count outside
    /// `1..=max_count`; `InsufficientQuestions` when backend and bank
    /// together cannot supply enough unique questions.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedSet, GenerationError> {
        if request.career_path.trim().is_empty() {
            return Err(GenerationError::invalid("careerPath must not be empty"));
        }
        if request.count == 0 || request.count > self.max_count {
            return Err(GenerationError::invalid(format!(
                "count must be between 1 and {}",
                self.max_count
            )));
        }

        let mut seen = self.exclusions(request, true);
        let mut questions = Vec::with_capacity(request.count);
        let mut warning = None;

        match self.call_backend(request).await {
            Ok(generated) => {
                for mut question in generated {
                    if questions.len() == request.count {
                        break;
                    }
                    question.difficulty = request.difficulty;
                    if question.id.trim().is_empty() || seen.has_id(&question.id) {
                        question.id = format!("gen-{}", Uuid::new_v4());
                    }
                    if seen.has_similar_prompt(&question.prompt) {
                        continue;
                    }
                    seen.insert(&question);
                    questions.push(question);
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    career_path = %request.career_path,
                    difficulty = %request.difficulty,
                    "question generation failed; using fallback bank"
                );
                warning = Some(format!("question generation failed ({e}); served questions from the fallback bank"));
            },
        }
        let generated = questions.len();

        if questions.len() < request.count {
            let needed = request.count - questions.len();
            questions.extend(self.bank.select(
                request.difficulty,
                &request.career_path,
                needed,
                &mut seen,
            ));
        }
        if questions.len() < request.count && request.candidate_id.is_some() {
            // Recent history is a preference; only the in-session ledger is binding.
            let mut relaxed = self.exclusions(request, false);
            for question in &questions {
                relaxed.insert(question);
            }
            let needed = request.count - questions.len();
            questions.extend(self.bank.select(
                request.difficulty,
                &request.career_path,
                needed,
                &mut relaxed,
            ));
        }
        if questions.len() < request.count {
            error!(
                requested = request.count,
                available = questions.len(),
                career_path = %request.career_path,
                difficulty = %request.difficulty,
                "question pipeline exhausted"
            );
            return Err(GenerationError::InsufficientQuestions {
                requested: request.count,
                available: questions.len(),
            });
        }

        let source = match generated {
            0 => QuestionSource::Fallback,
            n if n == request.count => QuestionSource::Generated,
            _ => QuestionSource::Mixed,
        };
        if warning.is_none() && source == QuestionSource::Mixed {
            warning = Some(format!(
                "generation returned {generated} usable questions; {} filled from the fallback bank",
                request.count - generated
            ));
        }
        if warning.is_none() && source == QuestionSource::Fallback {
            warning = Some("generation returned no usable questions; served questions from the fallback bank".to_string());
        }

        self.history.record(
            request.session_id.as_deref(),
            request.candidate_id.as_deref(),
            &request.career_path,
            &questions,
        );
        info!(
            count = questions.len(),
            source = ?source,
            session_id = request.session_id.as_deref().unwrap_or("-"),
            "questions generated"
        );
        Ok(GeneratedSet {
            questions,
            source,
            warning,
        })
    }
}
