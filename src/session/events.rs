//! Events der Session-Queue
//!
//! Alles, was den Zustand einer `CallSession` ändern kann, kommt als
//! `SessionEvent` über genau eine geordnete Queue.

use super::call::CallId;
use crate::call_engine::{CandidateError, EngineEvent, NegotiationEngine, NegotiationError};
use crate::signaling::{ChannelEvent, IceCandidate, SessionDescription};
use std::sync::Arc;

/// Absicht des Benutzers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Dial(String),
    Hangup,
    Disconnect,
}

/// Ergebnis eines abgeschlossenen Verhandlungsschritts
pub enum StepOutcome {
    /// Engine erzeugt, eigene SDP (Offer oder Answer) ist gesetzt
    LocalDescriptionReady {
        engine: Arc<dyn NegotiationEngine>,
        description: SessionDescription,
    },

    /// Answer der Gegenseite ist angewendet
    RemoteAnswerApplied,

    /// Ein Remote Candidate wurde von der Engine abgelehnt
    CandidateRejected {
        candidate: IceCandidate,
        error: CandidateError,
    },

    /// Verhandlungsschritt fehlgeschlagen
    Failed(NegotiationError),
}

impl std::fmt::Debug for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalDescriptionReady { description, .. } => f
                .debug_struct("LocalDescriptionReady")
                .field("kind", &description.kind)
                .finish_non_exhaustive(),
            Self::RemoteAnswerApplied => f.write_str("RemoteAnswerApplied"),
            Self::CandidateRejected { candidate, error } => f
                .debug_struct("CandidateRejected")
                .field("candidate", &candidate.candidate)
                .field("error", error)
                .finish(),
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    Intent(Intent),
    Channel(ChannelEvent),
    Engine { call_id: CallId, event: EngineEvent },
    Completion { call_id: CallId, outcome: StepOutcome },
}
