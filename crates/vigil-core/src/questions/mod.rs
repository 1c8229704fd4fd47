//! Question generation pipeline.
//!
//! Produces exactly the requested number of unique multiple-choice questions
//! for a career path and difficulty. The configured generation backend is
//! tried first under a timeout; whatever it cannot supply is filled from the
//! curated fallback bank.
//!
//! ```text
//!  request ──► backend (timeout) ──► validate ──► dedup ──┐
//!                                                         ├──► exactly N questions
//!              fallback bank (tiered, shuffled) ──► dedup ┘
//! ```
//!
//! Deduplication compares ids and normalized prompt text against the
//! questions already used in the session, the candidate's recent history for
//! the career path, and the set being assembled.

mod bank;
mod generator;
mod history;
mod pipeline;
mod similarity;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bank::FallbackBank;
pub use generator::{BackendRequest, HttpQuestionGenerator, QuestionGenerator, UnavailableGenerator};
pub use history::{QuestionHistory, UsedQuestion};
pub use pipeline::{GeneratedSet, QuestionPipeline, QuestionSource};
pub use similarity::{SeenQuestions, jaccard, normalize_prompt};

/// Every question has exactly this many options.
pub const OPTION_COUNT: usize = 4;

/// Errors from the generation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// The request itself is unusable.
    #[error("invalid generation request: {reason}")]
    InvalidRequest {
        /// What is wrong with it.
        reason: String,
    },

    /// No backend is configured.
    #[error("question generation backend is not configured")]
    Unavailable,

    /// The backend could not be reached or answered with an error status.
    #[error("generation backend failed: {reason}")]
    Backend {
        /// Transport or status detail.
        reason: String,
    },

    /// The backend did not answer within the configured timeout.
    #[error("generation backend timed out after {after_ms} ms")]
    Timeout {
        /// The timeout that elapsed.
        after_ms: u64,
    },

    /// The backend answered with something that is not a question list.
    #[error("generation backend returned malformed output: {reason}")]
    MalformedOutput {
        /// Parse detail.
        reason: String,
    },

    /// The fallback bank could not be loaded.
    #[error("fallback bank unusable: {reason}")]
    Bank {
        /// Load or parse detail.
        reason: String,
    },

    /// Backend and bank together could not supply enough unique questions.
    #[error("only {available} of {requested} unique questions available")]
    InsufficientQuestions {
        /// Requested count.
        requested: usize,
        /// Questions that could be assembled.
        available: usize,
    },
}

impl GenerationError {
    /// Creates an invalid-request error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(reason: impl fmt::Display) -> Self {
        Self::Backend {
            reason: reason.to_string(),
        }
    }

    /// Creates a malformed-output error.
    #[must_use]
    pub fn malformed(reason: impl fmt::Display) -> Self {
        Self::MalformedOutput {
            reason: reason.to_string(),
        }
    }

    /// Creates a bank error.
    #[must_use]
    pub fn bank(reason: impl fmt::Display) -> Self {
        Self::Bank {
            reason: reason.to_string(),
        }
    }
}

/// Question difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Entry level.
    Beginner,
    /// Working knowledge.
    Intermediate,
    /// Expert level.
    Advanced,
}

impl Difficulty {
    /// All difficulties, easiest first.
    pub const ALL: [Self; 3] = [Self::Beginner, Self::Intermediate, Self::Advanced];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    /// The other difficulties, nearest first.
    #[must_use]
    pub const fn adjacent(&self) -> [Self; 2] {
        match self {
            Self::Beginner => [Self::Intermediate, Self::Advanced],
            Self::Intermediate => [Self::Beginner, Self::Advanced],
            Self::Advanced => [Self::Intermediate, Self::Beginner],
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = GenerationError;

    /// Accepts only the lowercase wire names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|difficulty| difficulty.as_str() == s)
            .ok_or_else(|| GenerationError::invalid(format!("unknown difficulty {s:?}")))
    }
}

/// A multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Unique within a session's set.
    pub id: String,
    /// Question text.
    pub prompt: String,
    /// Exactly four options.
    pub options: [String; OPTION_COUNT],
    /// Index into `options`.
    pub correct_option_index: u8,
    /// Difficulty the question was served at.
    pub difficulty: Difficulty,
    /// Topic tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Question {
    /// Checks the structural rules every served question obeys.
    ///
    /// # Errors
    ///
    /// Returns the first rule the question breaks.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("blank prompt".to_string());
        }
        if usize::from(self.correct_option_index) >= OPTION_COUNT {
            return Err(format!(
                "correct option index {} out of range",
                self.correct_option_index
            ));
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err("blank option".to_string());
        }
        Ok(())
    }
}

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Career path the questions target.
    pub career_path: String,
    /// Requested difficulty.
    pub difficulty: Difficulty,
    /// Number of questions wanted.
    pub count: usize,
    /// Session the questions are for; enables in-session exclusion.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Candidate; enables cross-session history exclusion.
    #[serde(default)]
    pub candidate_id: Option<String>,
}

impl GenerationRequest {
    /// A request without session or candidate context.
    #[must_use]
    pub fn new(career_path: impl Into<String>, difficulty: Difficulty, count: usize) -> Self {
        Self {
            career_path: career_path.into(),
            difficulty,
            count,
            session_id: None,
            candidate_id: None,
        }
    }

    /// Attaches a session id.
    #[must_use]
    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attaches a candidate id.
    #[must_use]
    pub fn for_candidate(mut self, candidate_id: impl Into<String>) -> Self {
        self.candidate_id = Some(candidate_id.into());
        self
    }
}
