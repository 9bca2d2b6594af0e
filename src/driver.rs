//! Session Driver
//!
//! Führt die Event-Schleife einer verbundenen `CallSession`: Events aus der
//! Session-Queue und vom Signaling-Kanal werden der Reihe nach verarbeitet.
//! Benutzerabsichten kommen über einen `DriverHandle` in dieselbe Queue.

use crate::session::{CallSession, Intent, SessionEvent};
use crate::signaling::ChannelEvent;
use crate::status::{JournalEntry, StatusBoard, StatusSnapshot};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Intent konnte nicht zugestellt werden, der Driver läuft nicht mehr
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Session driver has stopped")]
pub struct DriverStopped;

pub struct SessionDriver {
    session: CallSession,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl SessionDriver {
    pub fn new(
        session: CallSession,
        session_rx: mpsc::UnboundedReceiver<SessionEvent>,
        channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> (Self, DriverHandle) {
        let handle = DriverHandle {
            tx: session.events(),
            status: session.status().clone(),
        };

        let driver = Self {
            session,
            session_rx,
            channel_rx,
        };
        (driver, handle)
    }

    /// Läuft, bis die Session endet. Danach werden noch die Ergebnisse
    /// laufender Verhandlungsschritte abgewartet, damit deren Engines
    /// geschlossen werden. Der Driver kann nach einem neuen `connect` erneut
    /// laufen.
    pub async fn run(mut self) -> Self {
        tracing::info!("Session driver started");

        loop {
            let event = tokio::select! {
                Some(event) = self.session_rx.recv() => event,
                channel_event = self.channel_rx.recv() => match channel_event {
                    Some(event) => SessionEvent::Channel(event),
                    None => {
                        tracing::warn!("Signaling channel dropped");
                        SessionEvent::Channel(ChannelEvent::Closed)
                    }
                },
            };

            self.session.handle(event).await;

            if !self.session.is_connected() {
                break;
            }
        }

        if self.session.has_pending_steps() {
            tracing::debug!("Waiting for in-flight negotiation steps");
        }
        while self.session.has_pending_steps() {
            match self.session_rx.recv().await {
                Some(event) => self.session.handle(event).await,
                None => break,
            }
        }

        tracing::info!("Session driver stopped");
        self
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CallSession {
        &mut self.session
    }
}

/// Klonbarer Zugang zu einer laufenden Session
#[derive(Clone, Debug)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
    status: StatusBoard,
}

impl DriverHandle {
    pub fn dial(&self, remote: impl Into<String>) -> Result<(), DriverStopped> {
        self.submit(Intent::Dial(remote.into()))
    }

    pub fn hang_up(&self) -> Result<(), DriverStopped> {
        self.submit(Intent::Hangup)
    }

    pub fn disconnect(&self) -> Result<(), DriverStopped> {
        self.submit(Intent::Disconnect)
    }

    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.status.journal()
    }

    fn submit(&self, intent: Intent) -> Result<(), DriverStopped> {
        self.tx
            .send(SessionEvent::Intent(intent))
            .map_err(|_| DriverStopped)
    }
}
