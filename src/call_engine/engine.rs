//! Negotiation Engine
//!
//! Abstraktion über die Peer Connection eines Anrufs. Die CallSession spricht
//! nur mit diesen Traits; die WebRTC-Implementierung steckt in `peer_connection.rs`.
//!
//! Callbacks der Engine (ICE Candidate, Remote Track, ICE-Status) werden nicht
//! direkt verarbeitet, sondern als `SessionEvent::Engine` in die Event-Queue
//! der Session gestellt.

use crate::media::{LocalTrack, RemoteStream};
use crate::session::{CallId, SessionEvent};
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// SDP-Erzeugung oder -Anwendung fehlgeschlagen (für den Anruf fatal)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Peer connection closed")]
    Closed,
}

/// Ein einzelner ICE Candidate konnte nicht übernommen werden (nicht fatal)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to add ICE candidate: {0}")]
pub struct CandidateError(pub String);

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// ICE-Verbindungsstatus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceState {
    /// Status, in denen der Anruf abgebaut wird
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Completed)
    }
}

/// Events die von einer Engine ausgelöst werden
#[derive(Debug)]
pub enum EngineEvent {
    /// Lokaler ICE Candidate, muss an die Gegenseite
    LocalCandidate(IceCandidate),

    /// Remote Audio-Stream ist angekommen
    RemoteTrack(RemoteStream),

    /// ICE-Verbindungsstatus hat sich geändert
    IceStateChanged(IceState),
}

/// Rückkanal einer Engine in die Event-Queue ihrer Session
///
/// Jedes Event trägt die ID des Anrufs, zu dem die Engine gehört. Events einer
/// bereits abgebauten Engine werden dadurch in der Session verworfen.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    call_id: CallId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EngineEvents {
    pub fn new(call_id: CallId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { call_id, tx }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(SessionEvent::Engine {
            call_id: self.call_id,
            event,
        });
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Peer Connection eines einzelnen Anrufs
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CandidateError>;

    /// Schließt die Peer Connection. Mehrfacher Aufruf ist erlaubt.
    async fn close(&self);
}

/// Erzeugt pro Anruf eine neue Engine, gebunden an die lokalen Tracks
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        tracks: &[LocalTrack],
        events: EngineEvents,
    ) -> Result<Arc<dyn NegotiationEngine>, NegotiationError>;
}

// ============================================================================
// NEGOTIATION STEPS
// ============================================================================

/// Erzeugt ein Offer und setzt es als Local Description
pub async fn local_offer(
    engine: &dyn NegotiationEngine,
) -> Result<SessionDescription, NegotiationError> {
    let offer = engine.create_offer().await?;
    engine.set_local_description(offer.clone()).await?;
    Ok(offer)
}

/// Übernimmt ein Remote Offer und beantwortet es
pub async fn answer_offer(
    engine: &dyn NegotiationEngine,
    offer: SessionDescription,
) -> Result<SessionDescription, NegotiationError> {
    engine.set_remote_description(offer).await?;
    let answer = engine.create_answer().await?;
    engine.set_local_description(answer.clone()).await?;
    Ok(answer)
}
