//! Signaling Module - WebSocket Client für den Relay
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Relay:
//! - WebSocket-Verbindung pro Benutzername aufbauen
//! - Nachrichten als JSON serialisieren und senden
//! - Eingehende Nachrichten parsen und in Reihenfolge weiterleiten
//!

mod client;
mod messages;

pub use client::{channel_url, ChannelEvent, SignalingChannel, SignalingError, Transport};
pub use messages::*;
