//! Call Engine Module - Verhandlung der Peer Connection
//!
//! Dieses Modul verwaltet:
//! - Traits für Engine und Engine-Factory
//! - Die Verhandlungsschritte (Offer, Answer)
//! - WebRTC Peer Connections

mod engine;
mod peer_connection;

pub use engine::{
    answer_offer, local_offer, CandidateError, EngineEvent, EngineEvents, EngineFactory,
    IceState, NegotiationEngine, NegotiationError,
};
pub use peer_connection::{WebRtcEngine, WebRtcEngineFactory};
