use async_trait::async_trait;
use dialtone::signaling::{ChannelEvent, SignalingError, SignalingMessage, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Mock Transport that records every outgoing message.
#[derive(Clone)]
pub struct MockTransport {
    events: mpsc::UnboundedSender<ChannelEvent>,
    sent: Arc<Mutex<Vec<SignalingMessage>>>,
    username: Arc<Mutex<Option<String>>>,
    open: Arc<AtomicBool>,
    refuse_connect: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Create a new MockTransport and the receiver for its channel events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            sent: Arc::new(Mutex::new(Vec::new())),
            username: Arc::new(Mutex::new(None)),
            open: Arc::new(AtomicBool::new(false)),
            refuse_connect: Arc::new(AtomicBool::new(false)),
            closes: Arc::new(AtomicUsize::new(0)),
        };
        (transport, rx)
    }

    pub fn refuse_connections(&self) {
        self.refuse_connect.store(true, Ordering::SeqCst);
    }

    /// All messages sent so far.
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().clone()
    }

    /// Remove and return all messages sent so far.
    pub fn take_sent(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Message types sent so far, in order.
    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|m| m.kind()).collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the relay dropping the connection.
    pub fn drop_connection(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(ChannelEvent::Closed);
        }
    }

    /// Simulate a transport-level error.
    pub fn fail(&self, reason: &str) {
        let _ = self.events.send(ChannelEvent::Error(reason.to_string()));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, username: &str) -> Result<(), SignalingError> {
        if username.is_empty() {
            return Err(SignalingError::InvalidUsername);
        }
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(SignalingError::ConnectionFailed("refused".to_string()));
        }

        let mut current = self.username.lock();
        if self.open.load(Ordering::SeqCst) {
            return match current.as_deref() {
                Some(name) if name == username => Ok(()),
                other => Err(SignalingError::AlreadyConnected {
                    current: other.unwrap_or_default().to_string(),
                }),
            };
        }

        *current = Some(username.to_string());
        self.open.store(true, Ordering::SeqCst);
        let _ = self.events.send(ChannelEvent::Opened {
            username: username.to_string(),
        });
        Ok(())
    }

    fn send(&self, message: SignalingMessage) {
        tracing::debug!("[MockTransport] send {}", message.kind());

        if self.open.load(Ordering::SeqCst) {
            self.sent.lock().push(message);
        } else {
            let _ = self
                .events
                .send(ChannelEvent::Error(SignalingError::NotConnected.to_string()));
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.drop_connection();
    }
}
