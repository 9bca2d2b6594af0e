//! Dialtone - Signaling-Client für P2P Audio-Calls
//!
//! Verhandelt über einen WebSocket-Relay eine direkte Audio-Verbindung
//! zwischen zwei Benutzern:
//! - Signaling über JSON-Nachrichten (offer, answer, candidate, call_end)
//! - WebRTC für die Peer Connection
//! - cpal für das Mikrofon
//! - Ein Zustandsautomat pro Client, höchstens ein Anruf gleichzeitig

pub mod call_engine;
pub mod config;
pub mod driver;
pub mod media;
pub mod session;
pub mod signaling;
pub mod status;

pub use config::ClientConfig;
pub use driver::{DriverHandle, DriverStopped, SessionDriver};
pub use session::{CallError, CallPhase, CallSession, SessionError};
pub use status::{SessionStatus, StatusBoard, StatusSnapshot};

use tracing_subscriber::EnvFilter;

/// Installiert das Logging. Ein zweiter Aufruf ändert nichts.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["dialtone=debug", "webrtc=warn"] {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Invalid log directive '{}': {}", directive, e),
        }
    }

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
