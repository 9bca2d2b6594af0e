//! Media Gate - Zugriff auf das Mikrofon
//!
//! Pro Session wird genau ein Capture-Handle (`LocalMedia`) geholt. Jeder
//! Anruf bekommt daraus einen eigenen `LocalTrack`, der beim Abbau des Anrufs
//! gestoppt wird. Sowohl `release` als auch `stop` sind idempotent.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Microphone access denied: {0}")]
    Denied(String),

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to start audio capture: {0}")]
    Stream(String),
}

// ============================================================================
// CAPTURE
// ============================================================================

/// Laufende Aufnahme hinter einem `LocalMedia`-Handle
pub trait Capture: Send {
    /// Stoppt die Aufnahme endgültig
    fn stop(self: Box<Self>);

    /// Liest einen Frame aufgenommener Samples, falls genug gepuffert sind
    fn read_frame(&self) -> Option<Vec<f32>> {
        None
    }
}

struct LocalMediaInner {
    stream_id: String,
    capture: Mutex<Option<Box<dyn Capture>>>,
}

/// Capture-Handle einer Session
#[derive(Clone)]
pub struct LocalMedia {
    inner: Arc<LocalMediaInner>,
}

impl LocalMedia {
    pub fn new(capture: Box<dyn Capture>) -> Self {
        Self {
            inner: Arc::new(LocalMediaInner {
                stream_id: format!("local-{}", Uuid::new_v4()),
                capture: Mutex::new(Some(capture)),
            }),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub fn is_released(&self) -> bool {
        self.inner.capture.lock().is_none()
    }

    /// Stoppt die Aufnahme. Gibt `true` zurück, wenn dieser Aufruf gestoppt hat.
    pub fn release(&self) -> bool {
        let capture = self.inner.capture.lock().take();
        match capture {
            Some(capture) => {
                capture.stop();
                true
            }
            None => false,
        }
    }

    /// Neuer Track für einen Anruf; `None` wenn die Aufnahme schon freigegeben ist
    pub fn track_for_call(&self) -> Option<LocalTrack> {
        if self.is_released() {
            return None;
        }
        Some(LocalTrack {
            id: format!("audio-{}", Uuid::new_v4()),
            source: Arc::clone(&self.inner),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.inner.stream_id)
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// LOCAL TRACK
// ============================================================================

/// Audio-Track, der an genau einen Anruf gebunden ist
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    source: Arc<LocalMediaInner>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.source.stream_id
    }

    /// Nächster aufgenommener Frame; `None` nach `stop` oder Freigabe der Aufnahme
    pub fn read_frame(&self) -> Option<Vec<f32>> {
        if self.is_stopped() {
            return None;
        }
        self.source
            .capture
            .lock()
            .as_ref()
            .and_then(|c| c.read_frame())
    }

    /// Gibt `true` zurück, wenn dieser Aufruf den Track gestoppt hat
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("stream_id", &self.source.stream_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ============================================================================
// MEDIA GATE
// ============================================================================

/// Holt das Mikrofon für eine Session
#[async_trait]
pub trait MediaGate: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia, MediaAccessError>;

    /// Gibt das Handle frei; ein zweiter Aufruf ist ein No-Op
    fn release(&self, media: &LocalMedia) {
        if media.release() {
            tracing::info!("Local media {} released", media.stream_id());
        }
    }
}
