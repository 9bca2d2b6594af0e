//! Remote Playback
//!
//! Nimmt den Audio-Stream der Gegenseite entgegen. Pro Anruf ist höchstens ein
//! Stream angehängt; ein neuer Stream ersetzt den alten.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Audio-Stream der Gegenseite, wie ihn die Engine meldet
#[derive(Debug)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    /// RTP-Payloads des Tracks, falls die Engine welche liefert
    pub packets: Option<mpsc::Receiver<Vec<u8>>>,
}

impl RemoteStream {
    pub fn new(stream_id: impl Into<String>, track_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            track_id: track_id.into(),
            packets: None,
        }
    }
}

/// Ausgabe für den Remote-Stream
pub trait PlaybackSink: Send + Sync {
    /// Hängt einen Stream an und ersetzt einen vorherigen
    fn attach(&self, stream: RemoteStream);

    /// Entfernt den angehängten Stream
    fn clear(&self);
}

// ============================================================================
// REMOTE PLAYBACK
// ============================================================================

/// Statistik über den aktuell angehängten Stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub stream_id: Option<String>,
    pub packets: u64,
    pub bytes: u64,
}

struct Attached {
    stream_id: String,
    drain: Option<JoinHandle<()>>,
}

/// Standard-Sink: liest die Pakete des angehängten Streams und zählt sie
#[derive(Default)]
pub struct RemotePlayback {
    current: Mutex<Option<Attached>>,
    stats: Arc<Mutex<PlaybackStats>>,
}

impl RemotePlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats.lock().clone()
    }

    pub fn attached_stream(&self) -> Option<String> {
        self.current.lock().as_ref().map(|a| a.stream_id.clone())
    }

    fn detach(&self) -> Option<String> {
        let previous = self.current.lock().take()?;
        if let Some(drain) = previous.drain {
            drain.abort();
        }
        Some(previous.stream_id)
    }
}

impl PlaybackSink for RemotePlayback {
    fn attach(&self, stream: RemoteStream) {
        if self.attached_stream().as_deref() == Some(stream.stream_id.as_str()) {
            tracing::debug!("Remote stream {} already attached", stream.stream_id);
            return;
        }

        if let Some(previous) = self.detach() {
            tracing::info!("Replacing remote stream {}", previous);
        }

        *self.stats.lock() = PlaybackStats {
            stream_id: Some(stream.stream_id.clone()),
            ..Default::default()
        };

        let drain = stream.packets.map(|mut packets| {
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                while let Some(payload) = packets.recv().await {
                    let mut stats = stats.lock();
                    stats.packets += 1;
                    stats.bytes += payload.len() as u64;
                }
            })
        });

        tracing::info!(
            "Remote stream {} (track {}) attached",
            stream.stream_id,
            stream.track_id
        );
        *self.current.lock() = Some(Attached {
            stream_id: stream.stream_id,
            drain,
        });
    }

    fn clear(&self) {
        if let Some(stream_id) = self.detach() {
            tracing::info!("Remote stream {} detached", stream_id);
        }
        *self.stats.lock() = PlaybackStats::default();
    }
}

impl std::fmt::Debug for RemotePlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePlayback")
            .field("attached", &self.attached_stream())
            .field("stats", &self.stats())
            .finish()
    }
}
