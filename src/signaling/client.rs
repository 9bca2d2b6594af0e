//! WebSocket Client für den Signaling-Relay
//!
//! Verwaltet die WebSocket-Verbindung zum Relay:
//! - Verbindung pro Benutzername (`/ws/<username>`)
//! - Serialisierung ausgehender Nachrichten
//! - Eingehende Nachrichten in Empfangsreihenfolge als Events weiterleiten

use super::messages::SignalingMessage;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Channel already open as '{current}'")]
    AlreadyConnected { current: String },

    #[error("Invalid username: must not be empty")]
    InvalidUsername,

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("Not connected to signaling relay")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// CHANNEL EVENTS
// ============================================================================

/// Events die vom SignalingChannel ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Verbindung steht, Relay kennt uns unter `username`
    Opened { username: String },

    /// Dekodierte Nachricht vom Relay
    Message(SignalingMessage),

    /// Verbindung getrennt (egal aus welchem Grund)
    Closed,

    /// Fehler auf Transport-Ebene
    Error(String),
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Alles, was die CallSession vom Signaling-Kanal braucht
#[async_trait]
pub trait Transport: Send + Sync {
    /// Öffnet den Kanal für `username`
    async fn connect(&self, username: &str) -> Result<(), SignalingError>;

    /// Sendet eine Nachricht. Fehler kommen als `ChannelEvent::Error` zurück.
    fn send(&self, message: SignalingMessage);

    /// Schließt den Kanal; `ChannelEvent::Closed` folgt
    fn close(&self);
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ChannelState {
    is_open: bool,
    username: Option<String>,
    /// Zählt Verbindungen hoch, damit ein alter Read-Task keine neue Verbindung abräumt
    generation: u64,
}

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close,
}

// ============================================================================
// SIGNALING CHANNEL
// ============================================================================

/// WebSocket-Kanal zum Relay
pub struct SignalingChannel {
    relay_url: String,
    state: Arc<RwLock<ChannelState>>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Outgoing>>>>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl SignalingChannel {
    /// Erstellt einen neuen Kanal und den Receiver für seine Events
    pub fn new(relay_url: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let channel = Self {
            relay_url: relay_url.into(),
            state: Arc::new(RwLock::new(ChannelState::default())),
            tx: Arc::new(Mutex::new(None)),
            event_tx,
        };
        (channel, event_rx)
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn open(&self, username: &str) -> Result<(), SignalingError> {
        let url = channel_url(&self.relay_url, username)?;

        tracing::info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel::<Outgoing>();

        let generation = {
            let mut state = self.state.write();
            if state.is_open {
                // Parallel aufgebaute Verbindung hat gewonnen
                let current = state.username.clone().unwrap_or_default();
                if current == username {
                    return Ok(());
                }
                return Err(SignalingError::AlreadyConnected { current });
            }
            state.is_open = true;
            state.username = Some(username.to_string());
            state.generation += 1;
            state.generation
        };
        *self.tx.lock() = Some(tx);

        self.emit(ChannelEvent::Opened {
            username: username.to_string(),
        });

        let guard = ConnectionGuard {
            generation,
            state: Arc::clone(&self.state),
            tx: Arc::clone(&self.tx),
            event_tx: self.event_tx.clone(),
        };

        let reader = tokio::spawn(read_loop(read, guard.clone()));
        tokio::spawn(write_loop(write, rx, reader.abort_handle(), guard));

        Ok(())
    }
}

// ============================================================================
// CONNECTION TASKS
// ============================================================================

/// Gemeinsamer Abschluss einer Verbindung für Read- und Write-Task
#[derive(Clone)]
struct ConnectionGuard {
    generation: u64,
    state: Arc<RwLock<ChannelState>>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Outgoing>>>>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl ConnectionGuard {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Disconnect-Status setzen, aber nur für die eigene Verbindung.
    /// `Closed` geht pro Verbindung genau einmal raus.
    fn finish(&self) {
        let closed = {
            let mut state = self.state.write();
            if state.generation == self.generation && state.is_open {
                state.is_open = false;
                self.tx.lock().take();
                true
            } else {
                false
            }
        };
        if closed {
            self.emit(ChannelEvent::Closed);
        }
    }
}

async fn read_loop<S, E>(mut read: S, guard: ConnectionGuard)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                Ok(message) => guard.emit(ChannelEvent::Message(message)),
                Err(e) => {
                    tracing::warn!("Dropping undecodable relay message: {}", e);
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by relay");
                break;
            }
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                guard.emit(ChannelEvent::Error(e.to_string()));
                break;
            }
            _ => {}
        }
    }

    guard.finish();
}

async fn write_loop<S>(
    mut write: S,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    reader: AbortHandle,
    guard: ConnectionGuard,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Text(text) => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    guard.emit(ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
            Outgoing::Close => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    tracing::debug!("Close frame not delivered: {}", e);
                }
                break;
            }
        }
    }

    // Ohne Writer ist die Verbindung tot, auch wenn der Reader noch läuft
    reader.abort();
    guard.finish();
    let _ = write.close().await;
}

#[async_trait]
impl Transport for SignalingChannel {
    async fn connect(&self, username: &str) -> Result<(), SignalingError> {
        if username.trim().is_empty() {
            return Err(SignalingError::InvalidUsername);
        }

        {
            let state = self.state.read();
            if state.is_open {
                let current = state.username.clone().unwrap_or_default();
                if current == username {
                    tracing::info!("Already connected as '{}'", current);
                    return Ok(());
                }
                return Err(SignalingError::AlreadyConnected { current });
            }
        }

        self.open(username).await
    }

    fn send(&self, message: SignalingMessage) {
        let kind = message.kind();
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {} message: {}", kind, e);
                self.emit(ChannelEvent::Error(
                    SignalingError::SendFailed(e.to_string()).to_string(),
                ));
                return;
            }
        };

        let sent = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Outgoing::Text(text)).is_ok(),
            None => false,
        };

        if sent {
            tracing::debug!("Sent {} message", kind);
        } else {
            tracing::warn!("Cannot send {} message: channel is not open", kind);
            self.emit(ChannelEvent::Error(SignalingError::NotConnected.to_string()));
        }
    }

    fn close(&self) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Outgoing::Close);
        }
    }
}

impl std::fmt::Debug for SignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingChannel")
            .field("relay_url", &self.relay_url)
            .field("state", &*self.state.read())
            .finish()
    }
}

/// Baut die Kanal-URL `<relay>/ws/<username>`; `http(s)` wird zu `ws(s)`
pub fn channel_url(relay_url: &str, username: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(relay_url).map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;

    let scheme = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => {
            return Err(SignalingError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|_| SignalingError::InvalidUrl(format!("cannot switch to {}", scheme)))?;
    }

    url.path_segments_mut()
        .map_err(|_| SignalingError::InvalidUrl("relay URL cannot be a base".to_string()))?
        .pop_if_empty()
        .push("ws")
        .push(username);

    Ok(url)
}
