//! Client-Konfiguration
//!
//! Standardwerte, überschreibbar über Umgebungsvariablen und danach über
//! Kommandozeilen-Flags.

use crate::call_engine::WebRtcEngineFactory;
use crate::status::DEFAULT_JOURNAL_CAPACITY;

/// Standard-Relay für lokale Entwicklung
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8000";

/// Öffentlicher STUN-Server
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Zugangsdaten für einen TURN-Server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub relay_url: String,
    pub ice_servers: Vec<String>,
    pub turn: Option<TurnServer>,
    pub event_log_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            turn: None,
            event_log_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Liest `SIGNALING_URL`, `ICE_SERVERS` und `TURN_URL`/`TURN_USERNAME`/`TURN_CREDENTIAL`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("SIGNALING_URL") {
            config.relay_url = url.trim().to_string();
        }

        if let Some(servers) = non_empty("ICE_SERVERS") {
            config.ice_servers = parse_server_list(&servers);
        }

        if let Some(url) = non_empty("TURN_URL") {
            config.turn = Some(TurnServer {
                url: url.trim().to_string(),
                username: lookup("TURN_USERNAME").unwrap_or_default(),
                credential: lookup("TURN_CREDENTIAL").unwrap_or_default(),
            });
        }

        config
    }

    /// Engine-Factory mit den konfigurierten ICE-Servern
    pub fn engine_factory(&self) -> WebRtcEngineFactory {
        let factory = WebRtcEngineFactory::new(&self.ice_servers);
        match &self.turn {
            Some(turn) => factory.with_turn_server(
                turn.url.clone(),
                turn.username.clone(),
                turn.credential.clone(),
            ),
            None => factory,
        }
    }
}

/// Kommagetrennte Liste von ICE-URLs
pub fn parse_server_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
