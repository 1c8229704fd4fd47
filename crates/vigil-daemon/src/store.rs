//! Ingested event storage.
//!
//! Events are kept in memory, oldest first, up to a fixed cap. When a journal
//! path is configured every accepted event is also appended to it as one JSON
//! line, and the journal is replayed at startup so a restart keeps history.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use vigil_core::ProctorEvent;

/// Errors from the event journal.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The journal could not be opened, read or appended to.
    #[error("journal {path}: {source}")]
    Journal {
        /// Journal path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// An event could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An accepted event with its server-assigned identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Identifier returned to the reporter.
    pub event_id: Uuid,
    /// When the daemon accepted the event.
    pub received_at: DateTime<Utc>,
    /// The event as reported.
    #[serde(flatten)]
    pub event: ProctorEvent,
}

struct Journal {
    path: PathBuf,
    file: File,
}

/// Bounded in-memory event store with an optional JSON-lines journal.
pub struct EventStore {
    events: Mutex<VecDeque<StoredEvent>>,
    max_events: usize,
    journal: Option<Mutex<Journal>>,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("len", &self.len())
            .field("max_events", &self.max_events)
            .field("journaled", &self.journal.is_some())
            .finish()
    }
}

impl EventStore {
    /// A memory-only store.
    #[must_use]
    pub fn in_memory(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events: max_events.max(1),
            journal: None,
        }
    }

    /// Opens a store backed by a journal, replaying whatever it holds.
    ///
    /// Lines that do not decode are skipped with a warning.
    pub fn open(max_events: usize, journal: &Path) -> Result<Self, StoreError> {
        let journal_err = |source| StoreError::Journal {
            path: journal.to_path_buf(),
            source,
        };
        let store = Self::in_memory(max_events);
        if journal.exists() {
            let reader = BufReader::new(File::open(journal).map_err(journal_err)?);
            let mut events = store.events();
            for (index, line) in reader.lines().enumerate() {
                let line = line.map_err(journal_err)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<StoredEvent>(&line) {
                    Ok(event) => push_bounded(&mut events, event, store.max_events),
                    Err(e) => warn!(line = index + 1, error = %e, "skipping unreadable journal entry"),
                }
            }
            info!(path = %journal.display(), restored = events.len(), "event journal replayed");
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(journal)
            .map_err(journal_err)?;
        Ok(Self {
            journal: Some(Mutex::new(Journal {
                path: journal.to_path_buf(),
                file,
            })),
            ..store
        })
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<StoredEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepts an event, journaling it first when a journal is configured.
    pub fn append(&self, event: ProctorEvent) -> Result<StoredEvent, StoreError> {
        let stored = StoredEvent {
            event_id: Uuid::new_v4(),
            received_at: Utc::now(),
            event,
        };
        if let Some(journal) = &self.journal {
            let mut line = serde_json::to_vec(&stored)?;
            line.push(b'\n');
            let mut journal = journal.lock().unwrap_or_else(PoisonError::into_inner);
            let Journal { path, file } = &mut *journal;
            file.write_all(&line)
                .and_then(|()| file.flush())
                .map_err(|source| StoreError::Journal {
                    path: path.clone(),
                    source,
                })?;
        }
        push_bounded(&mut self.events(), stored.clone(), self.max_events);
        Ok(stored)
    }

    /// Events for one session, or every event, oldest first.
    #[must_use]
    pub fn query(&self, session_id: Option<&str>) -> Vec<StoredEvent> {
        self.events()
            .iter()
            .filter(|stored| session_id.is_none_or(|id| stored.event.session_id() == id))
            .cloned()
            .collect()
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events().len()
    }

    /// Returns `true` when nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn push_bounded(events: &mut VecDeque<StoredEvent>, event: StoredEvent, cap: usize) {
    if events.len() == cap {
        events.pop_front();
    }
    events.push_back(event);
}

#[cfg(test)]
mod tests {
    use vigil_core::ProctorEventType;

    use super::*;

    fn event(session: &str) -> ProctorEvent {
        ProctorEvent::new(ProctorEventType::FocusLoss, session)
    }

    #[test]
    fn query_filters_by_session() {
        let store = EventStore::in_memory(10);
        store.append(event("a")).unwrap();
        store.append(event("b")).unwrap();
        store.append(event("a")).unwrap();

        assert_eq!(store.query(Some("a")).len(), 2);
        assert_eq!(store.query(Some("c")).len(), 0);
        assert_eq!(store.query(None).len(), 3);
    }

    #[test]
    fn oldest_events_are_evicted_at_capacity() {
        let store = EventStore::in_memory(2);
        let first = store.append(event("s-1")).unwrap();
        store.append(event("s-2")).unwrap();
        store.append(event("s-3")).unwrap();

        let kept = store.query(None);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|e| e.event_id != first.event_id));
    }

    #[test]
    fn journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let stored = {
            let store = EventStore::open(100, &path).unwrap();
            store.append(event("sess-1").with_meta("trigger", "focus-loss")).unwrap()
        };

        let reopened = EventStore::open(100, &path).unwrap();
        assert_eq!(reopened.query(Some("sess-1")), vec![stored]);
    }

    #[test]
    fn unreadable_journal_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let store = EventStore::open(100, &path).unwrap();
            store.append(event("sess-1")).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();

        let reopened = EventStore::open(100, &path).unwrap();
        assert_eq!(reopened.len(), 1);
    }
}
