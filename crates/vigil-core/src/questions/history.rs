//! Used-question ledgers.
//!
//! Two scopes are tracked: every question served within a session (never
//! repeated), and the questions a candidate saw in their most recent sessions
//! for a career path (avoided while the bank allows it).

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Question;

/// Maximum sessions tracked before the oldest ledger is forgotten.
pub const MAX_TRACKED_SESSIONS: usize = 10_000;

/// Maximum (candidate, career) histories tracked before the oldest is
/// forgotten.
pub const MAX_TRACKED_CANDIDATES: usize = 10_000;

/// Identity of a question previously served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedQuestion {
    /// Question id.
    pub id: String,
    /// Prompt text.
    pub prompt: String,
}

impl From<&Question> for UsedQuestion {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            prompt: question.prompt.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct HistoryState {
    sessions: HashMap<String, Vec<UsedQuestion>>,
    session_order: VecDeque<String>,
    candidates: HashMap<(String, String), VecDeque<(Option<String>, Vec<UsedQuestion>)>>,
    candidate_order: VecDeque<(String, String)>,
}

/// Per-session and per-candidate question ledgers.
#[derive(Debug)]
pub struct QuestionHistory {
    state: Mutex<HistoryState>,
    history_sessions: usize,
}

fn candidate_key(candidate_id: &str, career_path: &str) -> (String, String) {
    (
        candidate_id.trim().to_lowercase(),
        career_path.trim().to_lowercase(),
    )
}

impl QuestionHistory {
    /// Remembers each candidate's last `history_sessions` sessions per
    /// career path.
    #[must_use]
    pub fn new(history_sessions: usize) -> Self {
        Self {
            state: Mutex::new(HistoryState::default()),
            history_sessions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Questions already served in `session_id`.
    #[must_use]
    pub fn used_in_session(&self, session_id: &str) -> Vec<UsedQuestion> {
        self.lock()
            .sessions
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Questions the candidate saw in their recent sessions for the career.
    #[must_use]
    pub fn recent_for(&self, candidate_id: &str, career_path: &str) -> Vec<UsedQuestion> {
        self.lock()
            .candidates
            .get(&candidate_key(candidate_id, career_path))
            .map(|entries| entries.iter().flat_map(|(_, used)| used.iter().cloned()).collect())
            .unwrap_or_default()
    }

    /// Records a served set.
    pub fn record(
        &self,
        session_id: Option<&str>,
        candidate_id: Option<&str>,
        career_path: &str,
        questions: &[Question],
    ) {
        let used: Vec<UsedQuestion> = questions.iter().map(UsedQuestion::from).collect();
        let mut state = self.lock();

        if let Some(session_id) = session_id {
            if !state.sessions.contains_key(session_id) {
                state.session_order.push_back(session_id.to_string());
                while state.session_order.len() > MAX_TRACKED_SESSIONS {
                    if let Some(oldest) = state.session_order.pop_front() {
                        state.sessions.remove(&oldest);
                    }
                }
            }
            state
                .sessions
                .entry(session_id.to_string())
                .or_default()
                .extend(used.iter().cloned());
        }

        if let Some(candidate_id) = candidate_id {
            if self.history_sessions == 0 {
                return;
            }
            let key = candidate_key(candidate_id, career_path);
            if !state.candidates.contains_key(&key) {
                state.candidate_order.push_back(key.clone());
                while state.candidate_order.len() > MAX_TRACKED_CANDIDATES {
                    if let Some(oldest) = state.candidate_order.pop_front() {
                        state.candidates.remove(&oldest);
                    }
                }
            }
            let entries = state.candidates.entry(key).or_default();
            let session = session_id.map(str::to_string);
            match entries.back_mut() {
                Some((last, served)) if session.is_some() && *last == session => {
                    served.extend(used);
                },
                _ => entries.push_back((session, used)),
            }
            while entries.len() > self.history_sessions {
                entries.pop_front();
            }
        }
    }

    /// Forgets the in-session ledger so a fresh attempt starts clean.
    /// Candidate history is kept.
    pub fn clear_session(&self, session_id: &str) {
        let mut state = self.lock();
        if state.sessions.remove(session_id).is_some() {
            state.session_order.retain(|id| id != session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::Difficulty;

    fn q(id: &str) -> Question {
        Question {
            id: id.to_string(),
            prompt: format!("prompt {id}"),
            options: ["a", "b", "c", "d"].map(str::to_string),
            correct_option_index: 0,
            difficulty: Difficulty::Beginner,
            tags: Vec::new(),
        }
    }

    #[test]
    fn session_ledger_accumulates_and_clears() {
        let history = QuestionHistory::new(5);
        history.record(Some("s1"), None, "Nursing", &[q("a"), q("b")]);
        history.record(Some("s1"), None, "Nursing", &[q("c")]);
        assert_eq!(history.used_in_session("s1").len(), 3);
        assert!(history.used_in_session("s2").is_empty());

        history.clear_session("s1");
        assert!(history.used_in_session("s1").is_empty());
    }

    #[test]
    fn candidate_history_keeps_the_last_sessions() {
        let history = QuestionHistory::new(2);
        history.record(Some("s1"), Some("cand"), "Data Analyst", &[q("a")]);
        history.record(Some("s2"), Some("cand"), "Data Analyst", &[q("b")]);
        history.record(Some("s2"), Some("cand"), "Data Analyst", &[q("c")]);
        history.record(Some("s3"), Some("cand"), "Data Analyst", &[q("d")]);

        let ids: Vec<_> = history
            .recent_for("CAND", " data analyst ")
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
        assert!(history.recent_for("cand", "Nursing").is_empty());
    }

    #[test]
    fn ledgers_are_bounded() {
        let history = QuestionHistory::new(1);
        let total = MAX_TRACKED_SESSIONS.max(MAX_TRACKED_CANDIDATES) + 25;
        for n in 0..total {
            history.record(
                Some(&format!("s{n}")),
                Some(&format!("cand-{n}")),
                "Nursing",
                &[q("a")],
            );
        }

        let state = history.lock();
        assert_eq!(state.sessions.len(), MAX_TRACKED_SESSIONS);
        assert_eq!(state.session_order.len(), MAX_TRACKED_SESSIONS);
        assert_eq!(state.candidates.len(), MAX_TRACKED_CANDIDATES);
        assert_eq!(state.candidate_order.len(), MAX_TRACKED_CANDIDATES);
        drop(state);

        assert!(history.used_in_session("s0").is_empty());
        assert!(history.recent_for("cand-0", "Nursing").is_empty());
        let last = total - 1;
        assert_eq!(history.recent_for(&format!("cand-{last}"), "Nursing").len(), 1);
    }

    #[test]
    fn clearing_a_session_keeps_candidate_history() {
        let history = QuestionHistory::new(5);
        history.record(Some("s1"), Some("cand"), "Nursing", &[q("a")]);
        history.clear_session("s1");
        assert_eq!(history.recent_for("cand", "Nursing").len(), 1);
    }
}
