//! Curated fallback question bank.
//!
//! The bank ships embedded in the binary and can be replaced by a file of the
//! same JSON shape. Entries without a difficulty form the generic pool.
//!
//! At load time every pool is scanned in file order; an entry whose id was
//! already used, or whose prompt is textually similar to an earlier entry of
//! the same pool, lands on that pool's duplicate list and is never served.
//!
//! # Selection order
//!
//! | Tier | Source |
//! |------|--------|
//! | 1 | requested difficulty, tagged for the career path |
//! | 2 | requested difficulty, any career |
//! | 3 | generic pool |
//! | 4 | adjacent difficulties, nearest first (a bank configuration defect; logged) |
//!
//! Questions are shuffled within each tier.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::{debug, error};

use super::{Difficulty, GenerationError, OPTION_COUNT, Question, SeenQuestions};

const EMBEDDED_BANK: &str = include_str!("../../data/fallback_bank.json");

const STOPWORDS: &[&str] = &["and", "the", "for", "with", "of"];

#[derive(Debug, Deserialize)]
struct BankFile {
    questions: Vec<BankEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BankEntry {
    id: String,
    prompt: String,
    options: [String; OPTION_COUNT],
    correct_option_index: u8,
    #[serde(default)]
    difficulty: Option<Difficulty>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Default)]
struct Pool {
    questions: Vec<Question>,
    duplicates: Vec<String>,
}

/// The fallback question bank.
#[derive(Debug)]
pub struct FallbackBank {
    pools: BTreeMap<Difficulty, Pool>,
    generic: Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    CareerMatch,
    SameDifficulty,
    Generic,
    Adjacent,
}

fn career_keywords(career_path: &str) -> HashSet<String> {
    career_path
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| word.len() >= 3 && !STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn matches_career(question: &Question, keywords: &HashSet<String>) -> bool {
    question.tags.iter().any(|tag| {
        tag.split(|c: char| !c.is_alphanumeric())
            .any(|word| keywords.contains(&word.to_lowercase()))
    })
}

impl FallbackBank {
    /// Loads the bank compiled into the crate.
    ///
    /// # Errors
    ///
    /// Fails only if the embedded document is broken.
    pub fn embedded(similarity_threshold: f64) -> Result<Self, GenerationError> {
        Self::from_json(EMBEDDED_BANK, similarity_threshold)
    }

    /// Loads a bank from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or holds no usable entry.
    pub fn from_file(path: &Path, similarity_threshold: f64) -> Result<Self, GenerationError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| GenerationError::bank(format!("{}: {e}", path.display())))?;
        Self::from_json(&json, similarity_threshold)
    }

    /// Parses a bank document.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be parsed or holds no usable entry.
    pub fn from_json(json: &str, similarity_threshold: f64) -> Result<Self, GenerationError> {
        let file: BankFile = serde_json::from_str(json).map_err(GenerationError::bank)?;

        let mut pools: BTreeMap<Difficulty, Pool> = Difficulty::ALL
            .iter()
            .map(|d| (*d, Pool::default()))
            .collect();
        let mut generic = Pool::default();
        let mut seen_by_pool: BTreeMap<Option<Difficulty>, SeenQuestions> = BTreeMap::new();
        let mut ids = HashSet::new();

        for entry in file.questions {
            let pool_key = entry.difficulty;
            let question = Question {
                id: entry.id,
                prompt: entry.prompt,
                options: entry.options,
                correct_option_index: entry.correct_option_index,
                difficulty: entry.difficulty.unwrap_or(Difficulty::Beginner),
                tags: entry.tags,
            };
            let pool = match pool_key {
                Some(difficulty) => pools.entry(difficulty).or_default(),
                None => &mut generic,
            };
            if let Err(reason) = question.validate() {
                error!(id = %question.id, %reason, "invalid fallback bank entry");
                pool.duplicates.push(question.id);
                continue;
            }
            let seen = seen_by_pool
                .entry(pool_key)
                .or_insert_with(|| SeenQuestions::new(similarity_threshold));
            if !ids.insert(question.id.clone()) || seen.has_similar_prompt(&question.prompt) {
                debug!(id = %question.id, "fallback bank duplicate");
                pool.duplicates.push(question.id);
                continue;
            }
            seen.insert(&question);
            pool.questions.push(question);
        }

        let bank = Self { pools, generic };
        if bank.len() == 0 {
            return Err(GenerationError::bank("bank has no usable questions"));
        }
        Ok(bank)
    }

    /// Number of servable questions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.values().map(|p| p.questions.len()).sum::<usize>() + self.generic.questions.len()
    }

    /// Returns `true` if nothing is servable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Servable questions for `difficulty` without crossing difficulties:
    /// the difficulty's pool plus the generic pool.
    #[must_use]
    pub fn available(&self, difficulty: Difficulty) -> usize {
        self.pools
            .get(&difficulty)
            .map_or(0, |p| p.questions.len())
            + self.generic.questions.len()
    }

    /// Ids never served for `difficulty`: the difficulty pool's duplicates
    /// plus the generic pool's.
    #[must_use]
    pub fn duplicate_ids(&self, difficulty: Difficulty) -> Vec<String> {
        self.pools
            .get(&difficulty)
            .map(|p| p.duplicates.clone())
            .unwrap_or_default()
            .into_iter()
            .chain(self.generic.duplicates.iter().cloned())
            .collect()
    }

    fn tiers(&self, difficulty: Difficulty, career_path: &str) -> Vec<(Tier, Vec<Question>)> {
        let keywords = career_keywords(career_path);
        let same = self
            .pools
            .get(&difficulty)
            .map(|p| p.questions.as_slice())
            .unwrap_or_default();
        let (matching, rest): (Vec<Question>, Vec<Question>) = same
            .iter()
            .cloned()
            .partition(|q| matches_career(q, &keywords));
        let generic = self
            .generic
            .questions
            .iter()
            .cloned()
            .map(|mut q| {
                q.difficulty = difficulty;
                q
            })
            .collect();
        let mut tiers = vec![
            (Tier::CareerMatch, matching),
            (Tier::SameDifficulty, rest),
            (Tier::Generic, generic),
        ];
        for nearby in difficulty.adjacent() {
            if let Some(pool) = self.pools.get(&nearby) {
                tiers.push((Tier::Adjacent, pool.questions.clone()));
            }
        }
        tiers
    }

    /// Picks up to `count` questions not in `seen`, marking each pick as
    /// seen. Returns fewer only when the whole bank is exhausted.
    pub fn select(
        &self,
        difficulty: Difficulty,
        career_path: &str,
        count: usize,
        seen: &mut SeenQuestions,
    ) -> Vec<Question> {
        let mut rng = rand::thread_rng();
        let mut picked = Vec::with_capacity(count);
        let mut adjacent = 0usize;

        for (tier, mut candidates) in self.tiers(difficulty, career_path) {
            if picked.len() == count {
                break;
            }
            candidates.shuffle(&mut rng);
            for question in candidates {
                if picked.len() == count {
                    break;
                }
                if seen.is_duplicate(&question) {
                    continue;
                }
                seen.insert(&question);
                if tier == Tier::Adjacent {
                    adjacent += 1;
                }
                picked.push(question);
            }
        }

        if adjacent > 0 {
            error!(
                difficulty = %difficulty,
                career_path,
                adjacent,
                "fallback bank short for difficulty; served adjacent-difficulty questions"
            );
        }
        picked
    }
}
