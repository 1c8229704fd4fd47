//! Prompt normalization and near-duplicate detection.

use std::collections::{BTreeSet, HashSet};

use super::Question;

/// Lowercases, strips punctuation and collapses whitespace.
#[must_use]
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokens(prompt: &str) -> BTreeSet<String> {
    normalize_prompt(prompt)
        .split(' ')
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of the normalized word sets of two prompts.
#[must_use]
pub fn jaccard(a: &str, b: &str) -> f64 {
    similarity(&tokens(a), &tokens(b))
}

#[allow(clippy::cast_precision_loss)]
fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Ids and prompts already taken, checked before a question is accepted.
#[derive(Debug, Clone)]
pub struct SeenQuestions {
    threshold: f64,
    ids: HashSet<String>,
    normalized: HashSet<String>,
    token_sets: Vec<BTreeSet<String>>,
}

impl SeenQuestions {
    /// Empty set; prompts at or above `threshold` similarity are duplicates.
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            ids: HashSet::new(),
            normalized: HashSet::new(),
            token_sets: Vec::new(),
        }
    }

    /// Marks an id and prompt as taken.
    pub fn insert_parts(&mut self, id: &str, prompt: &str) {
        self.ids.insert(id.to_string());
        if self.normalized.insert(normalize_prompt(prompt)) {
            self.token_sets.push(tokens(prompt));
        }
    }

    /// Marks a question as taken.
    pub fn insert(&mut self, question: &Question) {
        self.insert_parts(&question.id, &question.prompt);
    }

    /// Whether the id is taken.
    #[must_use]
    pub fn has_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Whether the prompt matches or closely resembles a taken one.
    #[must_use]
    pub fn has_similar_prompt(&self, prompt: &str) -> bool {
        if self.normalized.contains(&normalize_prompt(prompt)) {
            return true;
        }
        let candidate = tokens(prompt);
        self.token_sets
            .iter()
            .any(|seen| similarity(seen, &candidate) >= self.threshold)
    }

    /// Whether the question repeats a taken id or prompt.
    #[must_use]
    pub fn is_duplicate(&self, question: &Question) -> bool {
        self.has_id(&question.id) || self.has_similar_prompt(&question.prompt)
    }

    /// Number of distinct prompts taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.token_sets.len()
    }

    /// Returns `true` if nothing is taken.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.token_sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        assert_eq!(
            normalize_prompt("  What does SQL's GROUP BY do?  "),
            "what does sql s group by do"
        );
    }

    #[test]
    fn jaccard_bounds() {
        assert!((jaccard("a b c", "c b a") - 1.0).abs() < f64::EPSILON);
        assert!(jaccard("alpha beta", "gamma delta").abs() < f64::EPSILON);
        let partial = jaccard("what is a primary key", "what is a foreign key");
        assert!(partial > 0.5 && partial < 1.0);
    }

    #[test]
    fn rephrased_prompt_is_a_duplicate() {
        let mut seen = SeenQuestions::new(0.85);
        seen.insert_parts("q-1", "Which SQL clause filters rows after aggregation?");
        assert!(seen.has_similar_prompt("which sql clause filters rows after aggregation"));
        assert!(seen.has_similar_prompt(
            "Which SQL clause filters the rows after aggregation?"
        ));
        assert!(!seen.has_similar_prompt("Which SQL clause sorts the result set?"));
        assert!(seen.has_id("q-1"));
        assert_eq!(seen.len(), 1);
    }
}
