//! Media Module - Mikrofon und Remote-Audio
//!
//! Dieses Modul verwaltet:
//! - Zugriff auf das Mikrofon (einmal pro Session)
//! - Lokale Tracks pro Anruf
//! - Wiedergabe-Senke für den Stream der Gegenseite

mod capture;
mod gate;
mod playback;

pub use capture::{CpalMediaGate, FRAME_SIZE, SAMPLE_RATE};
pub use gate::{Capture, LocalMedia, LocalTrack, MediaAccessError, MediaGate};
pub use playback::{PlaybackSink, PlaybackStats, RemotePlayback, RemoteStream};
