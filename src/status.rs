//! Status Board
//!
//! Zeigt jederzeit den Zustand der Session und des Anrufs an und führt ein
//! Journal der letzten Ereignisse (neueste zuerst).

use crate::session::CallPhase;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;

/// Standardgröße des Journals
pub const DEFAULT_JOURNAL_CAPACITY: usize = 50;

/// Verbindungsstatus zum Relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Momentaufnahme für die Anzeige
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub session: SessionStatus,
    pub call: CallPhase,
    pub remote: Option<String>,
    pub last_message: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            session: SessionStatus::Disconnected,
            call: CallPhase::Idle,
            remote: None,
            last_message: None,
        }
    }
}

/// Ein Eintrag im Journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    pub text: String,
}

struct Journal {
    entries: VecDeque<JournalEntry>,
    capacity: usize,
}

/// Geteilte Statusanzeige. Klonen teilt denselben Zustand.
#[derive(Clone)]
pub struct StatusBoard {
    snapshot: Arc<watch::Sender<StatusSnapshot>>,
    journal: Arc<Mutex<Journal>>,
}

impl StatusBoard {
    pub fn new(capacity: usize) -> Self {
        let (snapshot, _) = watch::channel(StatusSnapshot::default());
        Self {
            snapshot: Arc::new(snapshot),
            journal: Arc::new(Mutex::new(Journal {
                entries: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            })),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn set_session(&self, session: SessionStatus) {
        self.snapshot.send_if_modified(|s| {
            let changed = s.session != session;
            s.session = session;
            changed
        });
    }

    pub fn set_call(&self, call: CallPhase, remote: Option<&str>) {
        let remote = remote.map(str::to_string);
        self.snapshot.send_if_modified(|s| {
            let changed = s.call != call || s.remote != remote;
            s.call = call;
            s.remote = remote;
            changed
        });
    }

    /// Schreibt eine Meldung ins Journal und zeigt sie als letzte Meldung an
    pub fn record(&self, text: impl Into<String>) {
        let text = text.into();
        {
            let mut journal = self.journal.lock();
            journal.entries.push_front(JournalEntry {
                at: Utc::now(),
                text: text.clone(),
            });
            let capacity = journal.capacity;
            journal.entries.truncate(capacity);
        }
        self.snapshot.send_modify(|s| s.last_message = Some(text));
    }

    /// Journal, neueste Einträge zuerst
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().entries.iter().cloned().collect()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl std::fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBoard")
            .field("snapshot", &*self.snapshot.borrow())
            .field("journal_len", &self.journal.lock().entries.len())
            .finish()
    }
}
