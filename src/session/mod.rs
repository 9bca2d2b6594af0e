//! Session Module - Anrufsteuerung
//!
//! Dieses Modul verwaltet:
//! - Identität der lokalen Session (Benutzername, Mikrofon)
//! - Höchstens einen Anruf mit Engine und Tracks
//! - Die Event-Queue, über die alle Zustandsänderungen laufen

mod call;
mod events;
mod machine;

pub use call::{Call, CallId, CallPhase, CallState, Direction, Session};
pub use events::{Intent, SessionEvent, StepOutcome};
pub use machine::{CallError, CallSession, SessionError};
