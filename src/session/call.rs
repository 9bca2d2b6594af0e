//! Session- und Anruf-Zustand
//!
//! `CallState` trägt den Anruf in den Nicht-Idle-Varianten. Ein Anruf besitzt
//! seine Engine und seine Tracks exklusiv; wird er abgebaut, werden beide
//! freigegeben.

use crate::call_engine::NegotiationEngine;
use crate::media::{LocalMedia, LocalTrack};
use crate::signaling::IceCandidate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Eindeutige ID pro Anruf; verworfene Fortsetzungen erkennt man an ihr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

// ============================================================================
// SESSION
// ============================================================================

/// Lokale Identität für die Dauer einer Relay-Verbindung
#[derive(Debug)]
pub struct Session {
    pub username: String,
    pub media: LocalMedia,
}

// ============================================================================
// CANDIDATE BUFFERS
// ============================================================================

/// Lokale Candidates, die noch auf das Versenden unserer SDP warten
#[derive(Debug)]
pub enum OutboundCandidates {
    Held(Vec<IceCandidate>),
    Released,
}

/// Remote Candidates, die erst nach der Remote Description an die Engine gehen
#[derive(Debug)]
pub enum InboundCandidates {
    Buffered(Vec<IceCandidate>),
    /// Geordnete Übergabe an den Candidate-Worker des Anrufs
    Flowing(mpsc::UnboundedSender<IceCandidate>),
}

// ============================================================================
// CALL
// ============================================================================

pub struct Call {
    pub id: CallId,
    pub remote: String,
    pub direction: Direction,
    /// `None` solange die Engine noch erzeugt wird
    pub engine: Option<Arc<dyn NegotiationEngine>>,
    pub tracks: Vec<LocalTrack>,
    pub outbound: OutboundCandidates,
    pub inbound: InboundCandidates,
    /// Antwort der Gegenseite wird gerade angewendet
    pub answer_pending: bool,
}

impl Call {
    pub fn new(remote: impl Into<String>, direction: Direction, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: CallId::new(),
            remote: remote.into(),
            direction,
            engine: None,
            tracks,
            outbound: OutboundCandidates::Held(Vec::new()),
            inbound: InboundCandidates::Buffered(Vec::new()),
            answer_pending: false,
        }
    }

    pub fn remote_description_set(&self) -> bool {
        matches!(self.inbound, InboundCandidates::Flowing(_))
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("direction", &self.direction)
            .field("has_engine", &self.engine.is_some())
            .field("tracks", &self.tracks.len())
            .field("outbound", &self.outbound)
            .field("inbound", &self.inbound)
            .finish()
    }
}

// ============================================================================
// CALL STATE
// ============================================================================

#[derive(Debug, Default)]
pub enum CallState {
    #[default]
    Idle,
    Dialing(Call),
    Ringing(Call),
    Active(Call),
    /// Nur während des Abbaus
    Closing,
}

impl CallState {
    pub fn phase(&self) -> CallPhase {
        match self {
            Self::Idle => CallPhase::Idle,
            Self::Dialing(_) => CallPhase::Dialing,
            Self::Ringing(_) => CallPhase::Ringing,
            Self::Active(_) => CallPhase::Active,
            Self::Closing => CallPhase::Closing,
        }
    }

    pub fn call(&self) -> Option<&Call> {
        match self {
            Self::Dialing(call) | Self::Ringing(call) | Self::Active(call) => Some(call),
            Self::Idle | Self::Closing => None,
        }
    }

    pub fn call_mut(&mut self) -> Option<&mut Call> {
        match self {
            Self::Dialing(call) | Self::Ringing(call) | Self::Active(call) => Some(call),
            Self::Idle | Self::Closing => None,
        }
    }

    /// Anruf mit genau dieser ID, sonst `None`
    pub fn call_with_id(&mut self, id: CallId) -> Option<&mut Call> {
        self.call_mut().filter(|call| call.id == id)
    }

    pub fn into_call(self) -> Option<Call> {
        match self {
            Self::Dialing(call) | Self::Ringing(call) | Self::Active(call) => Some(call),
            Self::Idle | Self::Closing => None,
        }
    }
}

/// Zustand ohne Daten, für Anzeige und Tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Dialing,
    Ringing,
    Active,
    Closing,
}

impl std::fmt::Display for CallPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Ringing => "ringing",
            Self::Active => "active",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}
