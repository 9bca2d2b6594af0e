use std::sync::Arc;

use dialtone::session::SessionEvent;
use dialtone::signaling::{ChannelEvent, SignalingMessage};
use dialtone::{CallPhase, CallSession, SessionDriver, DriverHandle, StatusBoard};
use tokio::sync::mpsc;

use super::{EngineBehavior, MockEngineFactory, MockMediaGate, MockTransport, RecordingSink};

/// A `CallSession` wired to mocks, driven manually by the test.
pub struct TestPeer {
    pub username: String,
    pub session: CallSession,
    pub transport: MockTransport,
    pub engines: MockEngineFactory,
    pub media: MockMediaGate,
    pub playback: RecordingSink,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl TestPeer {
    /// Create a peer that is not connected yet.
    pub fn new(username: &str) -> Self {
        let (transport, channel_rx) = MockTransport::new();
        let engines = MockEngineFactory::new();
        let media = MockMediaGate::new();
        let playback = RecordingSink::new();

        let (session, session_rx) = CallSession::new(
            Arc::new(transport.clone()),
            Arc::new(engines.clone()),
            Arc::new(media.clone()),
            Arc::new(playback.clone()),
            StatusBoard::default(),
        );

        Self {
            username: username.to_string(),
            session,
            transport,
            engines,
            media,
            playback,
            session_rx,
            channel_rx,
        }
    }

    /// Create and connect a peer.
    pub async fn connected(username: &str) -> Self {
        Self::connected_with(username, EngineBehavior::default()).await
    }

    pub async fn connected_with(username: &str, behavior: EngineBehavior) -> Self {
        let mut peer = Self::new(username);
        peer.engines.set_behavior(behavior);
        peer.session
            .connect(username)
            .await
            .expect("Failed to connect test peer");
        peer.settle().await;
        peer
    }

    pub fn phase(&self) -> CallPhase {
        self.session.phase()
    }

    /// Process queued events until nothing happens for a while.
    pub async fn settle(&mut self) {
        let mut quiet_rounds = 0;
        while quiet_rounds < 20 {
            if let Ok(event) = self.channel_rx.try_recv() {
                self.session.handle(SessionEvent::Channel(event)).await;
                quiet_rounds = 0;
                continue;
            }
            if let Ok(event) = self.session_rx.try_recv() {
                self.session.handle(event).await;
                quiet_rounds = 0;
                continue;
            }
            quiet_rounds += 1;
            tokio::task::yield_now().await;
        }
    }

    /// Hand a relay message to the session without processing follow-ups.
    pub async fn push(&mut self, message: SignalingMessage) {
        self.session
            .handle(SessionEvent::Channel(ChannelEvent::Message(message)))
            .await;
    }

    /// Deliver a relay message and process everything it triggers.
    pub async fn deliver(&mut self, message: SignalingMessage) {
        self.push(message).await;
        self.settle().await;
    }

    /// Journal texts, newest first.
    pub fn journal(&self) -> Vec<String> {
        self.session
            .status()
            .journal()
            .into_iter()
            .map(|e| e.text)
            .collect()
    }

    pub fn into_driver(self) -> (SessionDriver, DriverHandle, MockTransport) {
        let (driver, handle) = SessionDriver::new(self.session, self.session_rx, self.channel_rx);
        (driver, handle, self.transport)
    }
}

/// Forward everything `from` sent to `to`, as the relay would.
pub async fn relay(from: &TestPeer, to: &mut TestPeer) {
    for message in from.transport.take_sent() {
        if message.target_user() == Some(to.username.as_str()) {
            to.deliver(message).await;
        }
    }
}

/// Bring `caller` and `callee` into an established call.
pub async fn establish_call(caller: &mut TestPeer, callee: &mut TestPeer) {
    caller
        .session
        .dial(&callee.username)
        .expect("Dial rejected");
    caller.settle().await;

    relay(caller, callee).await;
    relay(callee, caller).await;

    callee.engines.last().report_ice(dialtone::call_engine::IceState::Connected);
    callee.settle().await;

    assert_eq!(caller.phase(), CallPhase::Active);
    assert_eq!(callee.phase(), CallPhase::Active);
}
