//! Call Session - Zustandsautomat eines Clients
//!
//! Eine `CallSession` verarbeitet alle Events ihrer Queue nacheinander:
//! Benutzerabsichten, Events des Signaling-Kanals, Callbacks der Engine und
//! Ergebnisse von Verhandlungsschritten. Verhandlungsschritte laufen als
//! eigene Tasks und melden sich mit der ID ihres Anrufs zurück; passt die ID
//! nicht mehr zum aktuellen Anruf, wird das Ergebnis verworfen.

use super::call::{
    Call, CallId, CallPhase, CallState, Direction, InboundCandidates, OutboundCandidates, Session,
};
use super::events::{Intent, SessionEvent, StepOutcome};
use crate::call_engine::{
    answer_offer, local_offer, EngineEvent, EngineEvents, EngineFactory, IceState,
    NegotiationEngine,
};
use crate::media::{LocalTrack, MediaAccessError, MediaGate, PlaybackSink};
use crate::signaling::{
    ChannelEvent, IceCandidate, SdpKind, SessionDescription, SignalingError, SignalingMessage,
    Transport,
};
use crate::status::{SessionStatus, StatusBoard};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Abgelehnte Benutzerabsicht
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Not connected to the signaling relay")]
    NotConnected,

    #[error("Remote username must not be empty")]
    EmptyRemote,

    #[error("Cannot call yourself")]
    SelfCall,

    #[error("Already in a call with '{current}'")]
    Busy { current: String },

    #[error("No call in progress")]
    NoActiveCall,

    #[error("Local media is not available")]
    MediaUnavailable,
}

/// Session konnte nicht gestartet werden
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaAccessError),
}

// ============================================================================
// CALL SESSION
// ============================================================================

pub struct CallSession {
    transport: Arc<dyn Transport>,
    engines: Arc<dyn EngineFactory>,
    media_gate: Arc<dyn MediaGate>,
    playback: Arc<dyn PlaybackSink>,
    status: StatusBoard,
    session: Option<Session>,
    state: CallState,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Gestartete Verhandlungsschritte, deren Ergebnis noch aussteht
    pending_steps: usize,
}

impl CallSession {
    /// Erstellt eine neue Session und den Receiver ihrer Event-Queue
    pub fn new(
        transport: Arc<dyn Transport>,
        engines: Arc<dyn EngineFactory>,
        media_gate: Arc<dyn MediaGate>,
        playback: Arc<dyn PlaybackSink>,
        status: StatusBoard,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        let session = Self {
            transport,
            engines,
            media_gate,
            playback,
            status,
            session: None,
            state: CallState::Idle,
            events,
            pending_steps: 0,
        };
        (session, events_rx)
    }

    /// Sender in die eigene Queue, z.B. für Benutzerabsichten
    pub fn events(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.events.clone()
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn phase(&self) -> CallPhase {
        self.state.phase()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// `true`, solange ein Verhandlungsschritt noch sein Ergebnis schuldet.
    /// Erst danach ist jede Engine dieser Session wieder geschlossen.
    pub fn has_pending_steps(&self) -> bool {
        self.pending_steps > 0
    }

    pub fn local_username(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.username.as_str())
    }

    /// Gegenseite des aktuellen Anrufs
    pub fn remote(&self) -> Option<&str> {
        self.state.call().map(|call| call.remote.as_str())
    }

    // ========================================================================
    // INTENTS
    // ========================================================================

    /// Verbindet mit dem Relay und holt das Mikrofon für die Session
    pub async fn connect(&mut self, username: &str) -> Result<(), SessionError> {
        let username = username.trim();

        if let Some(session) = &self.session {
            if session.username == username {
                tracing::info!("Already connected as '{}'", username);
                self.status.record("Already connected.");
                return Ok(());
            }
            return Err(SignalingError::AlreadyConnected {
                current: session.username.clone(),
            }
            .into());
        }

        self.status.set_session(SessionStatus::Connecting);
        self.status
            .record(format!("Connecting to relay as {}...", username));

        if let Err(e) = self.transport.connect(username).await {
            tracing::error!("Failed to connect as '{}': {}", username, e);
            self.status.set_session(SessionStatus::Disconnected);
            self.status.record(format!("Connection failed: {}", e));
            return Err(e.into());
        }

        match self.media_gate.acquire().await {
            Ok(media) => {
                tracing::info!("Session started for '{}'", username);
                self.session = Some(Session {
                    username: username.to_string(),
                    media,
                });
                self.status.set_session(SessionStatus::Connected);
                self.status.record("Connected. Microphone access granted.");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Microphone access failed: {}", e);
                self.status
                    .record(format!("Microphone access failed: {}", e));
                self.transport.close();
                Err(e.into())
            }
        }
    }

    /// Startet einen ausgehenden Anruf
    pub fn dial(&mut self, remote: &str) -> Result<CallId, CallError> {
        let session = self.session.as_ref().ok_or(CallError::NotConnected)?;

        let remote = remote.trim();
        if remote.is_empty() {
            return Err(CallError::EmptyRemote);
        }
        if remote == session.username {
            return Err(CallError::SelfCall);
        }
        if let Some(call) = self.state.call() {
            return Err(CallError::Busy {
                current: call.remote.clone(),
            });
        }

        let track = session
            .media
            .track_for_call()
            .ok_or(CallError::MediaUnavailable)?;

        let call = Call::new(remote, Direction::Outgoing, vec![track]);
        let call_id = call.id;
        tracing::info!("Dialing {} (call {})", remote, call_id);

        self.spawn_negotiation(call_id, call.tracks.clone(), None);
        self.state = CallState::Dialing(call);
        self.publish_call();
        self.status.record(format!("Calling {}...", remote));

        Ok(call_id)
    }

    /// Beendet den aktuellen Anruf und benachrichtigt die Gegenseite
    pub async fn hang_up(&mut self) -> Result<(), CallError> {
        let remote = self
            .remote()
            .map(str::to_string)
            .ok_or(CallError::NoActiveCall)?;

        self.status.record("Hanging up...");
        if let Some(local) = self.local_username() {
            let message = SignalingMessage::CallEnd {
                from: local.to_string(),
                target_user: remote,
            };
            self.transport.send(message);
        }

        self.teardown("local hangup").await;
        Ok(())
    }

    /// Legt auf und schließt den Kanal; die Session endet mit `ChannelEvent::Closed`
    pub async fn disconnect(&mut self) {
        if self.state.call().is_some() {
            let _ = self.hang_up().await;
        }
        tracing::info!("Disconnecting from signaling relay");
        self.transport.close();
    }

    // ========================================================================
    // EVENT HANDLING
    // ========================================================================

    pub async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Intent(intent) => self.handle_intent(intent).await,
            SessionEvent::Channel(event) => self.handle_channel(event).await,
            SessionEvent::Engine { call_id, event } => self.handle_engine(call_id, event).await,
            SessionEvent::Completion { call_id, outcome } => {
                self.handle_completion(call_id, outcome).await
            }
        }
    }

    async fn handle_intent(&mut self, intent: Intent) {
        let result = match intent {
            Intent::Dial(remote) => self.dial(&remote).map(|_| ()),
            Intent::Hangup => self.hang_up().await,
            Intent::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::warn!("Intent rejected: {}", e);
            self.status.record(e.to_string());
        }
    }

    async fn handle_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened { username } => {
                tracing::debug!("Signaling channel open for '{}'", username);
            }
            ChannelEvent::Message(message) => self.handle_message(message).await,
            ChannelEvent::Closed => self.on_channel_closed().await,
            ChannelEvent::Error(e) => {
                tracing::error!("Signaling channel error: {}", e);
                self.status.record(format!("Signaling error: {}", e));
                self.teardown("signaling error").await;
                self.transport.close();
            }
        }
    }

    async fn handle_message(&mut self, message: SignalingMessage) {
        tracing::debug!("Received {} message", message.kind());

        match message {
            SignalingMessage::Offer { from, sdp, .. } => self.on_remote_offer(from, sdp),
            SignalingMessage::Answer { from, sdp, .. } => self.on_remote_answer(&from, sdp),
            SignalingMessage::Candidate {
                from, candidate, ..
            } => self.on_remote_candidate(&from, candidate),
            SignalingMessage::CallEnd { from, .. } => self.on_remote_call_end(&from).await,
            SignalingMessage::UserNotFound { target_user } => {
                self.on_user_not_found(&target_user).await
            }
            SignalingMessage::Error { message } => {
                tracing::warn!("Relay reported an error: {}", message);
                self.status.record(format!("Relay error: {}", message));
            }
        }
    }

    fn on_remote_offer(&mut self, from: String, offer: SessionDescription) {
        if offer.kind != SdpKind::Offer {
            tracing::warn!("Ignoring offer from {} carrying a {:?} description", from, offer.kind);
            return;
        }

        let Some(session) = &self.session else {
            tracing::warn!("Ignoring offer from {}: no session", from);
            return;
        };

        if let Some(call) = self.state.call() {
            tracing::warn!(
                "Rejecting offer from {}: already in a call with {}",
                from,
                call.remote
            );
            self.status
                .record(format!("Incoming call from {} rejected: already in a call.", from));
            return;
        }

        if from == session.username {
            tracing::warn!("Ignoring offer sent by ourselves");
            return;
        }

        let Some(track) = session.media.track_for_call() else {
            tracing::error!("Cannot answer {}: local media released", from);
            return;
        };

        let call = Call::new(from.clone(), Direction::Incoming, vec![track]);
        let call_id = call.id;
        tracing::info!("Incoming call from {} (call {})", from, call_id);

        self.spawn_negotiation(call_id, call.tracks.clone(), Some(offer));
        self.state = CallState::Ringing(call);
        self.publish_call();
        self.status.record(format!("Incoming call from {}.", from));
    }

    fn on_remote_answer(&mut self, from: &str, answer: SessionDescription) {
        let call = match &mut self.state {
            CallState::Dialing(call) if call.remote == from => call,
            state => {
                tracing::warn!(
                    "Ignoring answer from {} in state {}",
                    from,
                    state.phase()
                );
                return;
            }
        };

        if answer.kind != SdpKind::Answer {
            tracing::warn!("Ignoring answer from {} carrying a {:?} description", from, answer.kind);
            return;
        }
        if call.answer_pending || call.remote_description_set() {
            tracing::warn!("Ignoring duplicate answer from {}", from);
            return;
        }
        let Some(engine) = call.engine.clone() else {
            tracing::warn!("Ignoring answer from {}: offer not sent yet", from);
            return;
        };

        call.answer_pending = true;
        let call_id = call.id;
        let tx = self.events.clone();
        self.pending_steps += 1;

        tokio::spawn(async move {
            let outcome = match engine.set_remote_description(answer).await {
                Ok(()) => StepOutcome::RemoteAnswerApplied,
                Err(e) => StepOutcome::Failed(e),
            };
            let _ = tx.send(SessionEvent::Completion { call_id, outcome });
        });
    }

    fn on_remote_candidate(&mut self, from: &str, candidate: IceCandidate) {
        let Some(call) = self.state.call_mut() else {
            tracing::debug!("Ignoring candidate from {}: no call", from);
            return;
        };
        if call.remote != from {
            tracing::warn!(
                "Ignoring candidate from {} during call with {}",
                from,
                call.remote
            );
            return;
        }

        match &mut call.inbound {
            InboundCandidates::Buffered(pending) => {
                tracing::debug!("Buffering remote candidate until remote description is set");
                pending.push(candidate);
            }
            InboundCandidates::Flowing(tx) => {
                let _ = tx.send(candidate);
            }
        }
    }

    async fn on_remote_call_end(&mut self, from: &str) {
        let current = self.remote().map(str::to_string);
        match current.as_deref() {
            Some(remote) if remote == from => {
                tracing::info!("{} ended the call", from);
                self.status.record(format!("{} hung up.", from));
                self.teardown("remote call_end").await;
            }
            Some(remote) => {
                tracing::warn!("Ignoring call_end from {} during call with {}", from, remote);
            }
            None => tracing::debug!("Ignoring call_end from {}: no call", from),
        }
    }

    async fn on_user_not_found(&mut self, target: &str) {
        if self.remote() != Some(target) {
            tracing::debug!("Ignoring user_not_found for {}: not the current call", target);
            return;
        }

        tracing::warn!("User {} is not connected to the relay", target);
        self.status
            .record(format!("User {} is not connected.", target));
        self.teardown("user not found").await;
    }

    async fn on_channel_closed(&mut self) {
        tracing::info!("Signaling channel closed");
        self.teardown("signaling channel closed").await;

        if let Some(session) = self.session.take() {
            self.media_gate.release(&session.media);
            tracing::info!("Session for '{}' ended", session.username);
        }
        self.status.set_session(SessionStatus::Disconnected);
        self.status.record("Disconnected from relay.");
    }

    async fn handle_engine(&mut self, call_id: CallId, event: EngineEvent) {
        let Some(call) = self.state.call_with_id(call_id) else {
            tracing::debug!("Discarding engine event for stale call {}", call_id);
            return;
        };

        match event {
            EngineEvent::LocalCandidate(candidate) => {
                if let OutboundCandidates::Held(pending) = &mut call.outbound {
                    tracing::debug!("Holding local candidate until our description is sent");
                    pending.push(candidate);
                    return;
                }
                let remote = call.remote.clone();
                self.send_candidate(&remote, candidate);
            }
            EngineEvent::RemoteTrack(stream) => {
                tracing::info!("Remote track received for call {}", call_id);
                self.playback.attach(stream);
                self.status.record("Remote audio received.");
            }
            EngineEvent::IceStateChanged(ice) => {
                let remote = call.remote.clone();
                tracing::debug!("ICE state for call {}: {:?}", call_id, ice);

                if ice.is_terminal() {
                    self.status
                        .record(format!("ICE connection {}. Hanging up...", ice_label(ice)));
                    self.teardown("ICE connection lost").await;
                } else if ice.is_connected() && matches!(self.state, CallState::Ringing(_)) {
                    self.promote_to_active();
                    self.status
                        .record(format!("Call with {} connected.", remote));
                }
            }
        }
    }

    async fn handle_completion(&mut self, call_id: CallId, outcome: StepOutcome) {
        if !matches!(outcome, StepOutcome::CandidateRejected { .. }) {
            self.pending_steps = self.pending_steps.saturating_sub(1);
        }

        match outcome {
            StepOutcome::LocalDescriptionReady {
                engine,
                description,
            } => self.on_local_description(call_id, engine, description).await,
            StepOutcome::RemoteAnswerApplied => self.on_answer_applied(call_id),
            StepOutcome::CandidateRejected { candidate, error } => {
                if self.state.call_with_id(call_id).is_some() {
                    tracing::warn!("{} ({})", error, candidate.candidate);
                    self.status.record("Failed to add ICE candidate.");
                }
            }
            StepOutcome::Failed(e) => {
                if self.state.call_with_id(call_id).is_none() {
                    tracing::debug!("Discarding failure of stale call {}: {}", call_id, e);
                    return;
                }
                tracing::error!("Negotiation failed for call {}: {}", call_id, e);
                self.status.record(format!("Negotiation failed: {}", e));
                self.teardown("negotiation failed").await;
            }
        }
    }

    /// Eigene SDP steht: versenden, gehaltene Candidates nachschieben
    async fn on_local_description(
        &mut self,
        call_id: CallId,
        engine: Arc<dyn NegotiationEngine>,
        description: SessionDescription,
    ) {
        let local = self.local_username().map(str::to_string);
        let kind = description.kind;
        let call = match &mut self.state {
            CallState::Dialing(call)
                if kind == SdpKind::Offer && call.id == call_id && call.engine.is_none() =>
            {
                call
            }
            CallState::Ringing(call)
                if kind == SdpKind::Answer && call.id == call_id && call.engine.is_none() =>
            {
                call
            }
            _ => {
                tracing::debug!("Discarding local description of stale call {}", call_id);
                engine.close().await;
                return;
            }
        };
        let Some(local) = local else {
            engine.close().await;
            return;
        };

        call.engine = Some(Arc::clone(&engine));
        if call.direction == Direction::Incoming {
            // answer_offer hat die Remote Description schon gesetzt
            open_inbound(call, engine, &self.events);
        }

        let remote = call.remote.clone();
        let held = match std::mem::replace(&mut call.outbound, OutboundCandidates::Released) {
            OutboundCandidates::Held(held) => held,
            OutboundCandidates::Released => Vec::new(),
        };

        let message = match description.kind {
            SdpKind::Offer => SignalingMessage::Offer {
                from: local,
                target_user: remote.clone(),
                sdp: description,
            },
            SdpKind::Answer => SignalingMessage::Answer {
                from: local,
                target_user: remote.clone(),
                sdp: description,
            },
        };
        let kind = message.kind();
        self.transport.send(message);
        self.status.record(format!("Sent {} to {}.", kind, remote));

        if !held.is_empty() {
            tracing::debug!("Flushing {} held local candidate(s) to {}", held.len(), remote);
        }
        for candidate in held {
            self.send_candidate(&remote, candidate);
        }
    }

    fn on_answer_applied(&mut self, call_id: CallId) {
        let call = match &mut self.state {
            CallState::Dialing(call) if call.id == call_id => call,
            _ => {
                tracing::debug!("Discarding applied answer of stale call {}", call_id);
                return;
            }
        };

        call.answer_pending = false;
        if let Some(engine) = call.engine.clone() {
            open_inbound(call, engine, &self.events);
        }
        let remote = call.remote.clone();

        self.promote_to_active();
        tracing::info!("Call {} with {} is active", call_id, remote);
        self.status
            .record(format!("Call with {} connected.", remote));
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn send_candidate(&self, remote: &str, candidate: IceCandidate) {
        let Some(local) = self.local_username() else {
            tracing::warn!("Dropping local candidate: no session");
            return;
        };
        self.transport.send(SignalingMessage::Candidate {
            from: local.to_string(),
            target_user: remote.to_string(),
            candidate,
        });
    }

    /// Erzeugt die Engine eines Anrufs und setzt die eigene Description.
    /// Mit `remote_offer` wird beantwortet, sonst ein Offer erzeugt.
    fn spawn_negotiation(
        &mut self,
        call_id: CallId,
        tracks: Vec<LocalTrack>,
        remote_offer: Option<SessionDescription>,
    ) {
        let engines = Arc::clone(&self.engines);
        let tx = self.events.clone();
        self.pending_steps += 1;

        tokio::spawn(async move {
            let events = EngineEvents::new(call_id, tx.clone());
            let outcome = match engines.create(&tracks, events).await {
                Ok(engine) => {
                    let result = match remote_offer {
                        Some(offer) => answer_offer(engine.as_ref(), offer).await,
                        None => local_offer(engine.as_ref()).await,
                    };
                    match result {
                        Ok(description) => StepOutcome::LocalDescriptionReady {
                            engine,
                            description,
                        },
                        Err(e) => {
                            engine.close().await;
                            StepOutcome::Failed(e)
                        }
                    }
                }
                Err(e) => StepOutcome::Failed(e),
            };
            let _ = tx.send(SessionEvent::Completion { call_id, outcome });
        });
    }

    fn promote_to_active(&mut self) {
        self.state = match std::mem::take(&mut self.state) {
            CallState::Dialing(call) | CallState::Ringing(call) => CallState::Active(call),
            other => other,
        };
        self.publish_call();
    }

    fn publish_call(&self) {
        self.status.set_call(self.state.phase(), self.remote());
    }

    /// Baut den aktuellen Anruf ab. Ohne Anruf passiert nichts.
    async fn teardown(&mut self, reason: &str) {
        let call = match std::mem::replace(&mut self.state, CallState::Closing).into_call() {
            Some(call) => call,
            None => {
                self.state = CallState::Idle;
                return;
            }
        };

        tracing::info!("Tearing down call {} with {}: {}", call.id, call.remote, reason);
        self.status.set_call(CallPhase::Closing, Some(&call.remote));

        let Call {
            engine,
            tracks,
            inbound,
            ..
        } = call;
        // Candidate-Worker endet mit seinem Sender
        drop(inbound);

        if let Some(engine) = engine {
            engine.close().await;
        }
        for track in &tracks {
            if track.stop() {
                tracing::debug!("Local track {} stopped", track.id());
            }
        }
        self.playback.clear();

        self.state = CallState::Idle;
        self.publish_call();
        self.status.record("Call ended.");
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("session", &self.session)
            .field("state", &self.state)
            .field("pending_steps", &self.pending_steps)
            .finish()
    }
}

/// Schaltet die Remote Candidates eines Anrufs auf einen geordneten Worker um
fn open_inbound(
    call: &mut Call,
    engine: Arc<dyn NegotiationEngine>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<IceCandidate>();
    let buffered = match std::mem::replace(&mut call.inbound, InboundCandidates::Flowing(tx.clone())) {
        InboundCandidates::Buffered(buffered) => buffered,
        InboundCandidates::Flowing(_) => Vec::new(),
    };

    let call_id = call.id;
    let events = events.clone();
    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            if let Err(error) = engine.add_ice_candidate(candidate.clone()).await {
                let _ = events.send(SessionEvent::Completion {
                    call_id,
                    outcome: StepOutcome::CandidateRejected { candidate, error },
                });
            }
        }
    });

    if !buffered.is_empty() {
        tracing::debug!("Applying {} buffered remote candidate(s)", buffered.len());
    }
    for candidate in buffered {
        let _ = tx.send(candidate);
    }
}

fn ice_label(state: IceState) -> &'static str {
    match state {
        IceState::Failed => "failed",
        IceState::Disconnected => "disconnected",
        IceState::Closed => "closed",
        IceState::New => "new",
        IceState::Checking => "checking",
        IceState::Connected => "connected",
        IceState::Completed => "completed",
    }
}
