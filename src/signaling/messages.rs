//! Message Types für das Signaling-Protokoll
//!
//! Alle Nachrichten sind JSON-Objekte mit einem `type`-Feld. Die Felder
//! `sdp` und `candidate` haben dieselbe Form wie bei Browser-Peers, damit
//! beide Seiten über denselben Relay sprechen können.

use serde::{Deserialize, Serialize};

// ============================================================================
// PAYLOADS
// ============================================================================

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP Offer oder Answer, wie `RTCSessionDescription` sie serialisiert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate im `RTCIceCandidateInit`-Format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

/// Eine Nachricht zwischen Client und Relay (in beide Richtungen)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// SDP Offer des Anrufers
    Offer {
        from: String,
        target_user: String,
        sdp: SessionDescription,
    },

    /// SDP Answer des Angerufenen
    Answer {
        from: String,
        target_user: String,
        sdp: SessionDescription,
    },

    /// Trickle-ICE Candidate
    Candidate {
        from: String,
        target_user: String,
        candidate: IceCandidate,
    },

    /// Anruf beendet
    CallEnd { from: String, target_user: String },

    /// Ziel ist beim Relay nicht angemeldet (nur eingehend)
    UserNotFound { target_user: String },

    /// Fehler vom Relay (nur eingehend)
    Error { message: String },
}

impl SignalingMessage {
    /// Wire-Name des Nachrichtentyps, für Logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::CallEnd { .. } => "call_end",
            Self::UserNotFound { .. } => "user_not_found",
            Self::Error { .. } => "error",
        }
    }

    /// Empfänger, falls die Nachricht einen hat
    pub fn target_user(&self) -> Option<&str> {
        match self {
            Self::Offer { target_user, .. }
            | Self::Answer { target_user, .. }
            | Self::Candidate { target_user, .. }
            | Self::CallEnd { target_user, .. }
            | Self::UserNotFound { target_user } => Some(target_user),
            Self::Error { .. } => None,
        }
    }
}
