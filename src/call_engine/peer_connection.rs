//! WebRTC Engine
//!
//! Implementiert `NegotiationEngine` mit einer `RTCPeerConnection` aus dem
//! webrtc-Crate.

use super::engine::{
    CandidateError, EngineEvent, EngineEvents, EngineFactory, IceState, NegotiationEngine,
    NegotiationError,
};
use crate::media::{LocalTrack, RemoteStream, FRAME_SIZE, SAMPLE_RATE};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Puffer für RTP-Payloads eines Remote Tracks; bei Überlauf wird verworfen
const REMOTE_PACKET_BUFFER: usize = 64;

/// Dauer eines Capture-Frames (20ms)
const FRAME_DURATION: Duration =
    Duration::from_micros(FRAME_SIZE as u64 * 1_000_000 / SAMPLE_RATE as u64);

// ============================================================================
// FACTORY
// ============================================================================

/// Baut pro Anruf eine neue Peer Connection mit den konfigurierten ICE-Servern
#[derive(Debug, Clone)]
pub struct WebRtcEngineFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngineFactory {
    pub fn new(ice_server_urls: &[String]) -> Self {
        let ice_servers = if ice_server_urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_server_urls.to_vec(),
                ..Default::default()
            }]
        };
        Self { ice_servers }
    }

    /// Fügt einen TURN-Server mit Credentials hinzu
    pub fn with_turn_server(mut self, url: String, username: String, credential: String) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls: vec![url],
            username,
            credential,
            ..Default::default()
        });
        self
    }

    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, NegotiationError> {
        // Media Engine mit Opus konfigurieren
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(config).await.map_err(webrtc_error)?;
        Ok(Arc::new(pc))
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(
        &self,
        tracks: &[LocalTrack],
        events: EngineEvents,
    ) -> Result<Arc<dyn NegotiationEngine>, NegotiationError> {
        let pc = self.create_peer_connection().await?;

        for track in tracks {
            let rtp_track = Arc::new(TrackLocalStaticRTP::new(
                RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: SAMPLE_RATE,
                    channels: 1,
                    ..Default::default()
                },
                track.id().to_string(),
                track.stream_id().to_string(),
            ));

            if let Err(e) = pc
                .add_track(rtp_track as Arc<dyn TrackLocal + Send + Sync>)
                .await
            {
                let _ = pc.close().await;
                return Err(webrtc_error(e));
            }
        }
        for track in tracks {
            spawn_frame_pump(track.clone());
        }

        register_handlers(&pc, events);
        tracing::debug!("Peer connection created with {} local track(s)", tracks.len());

        Ok(Arc::new(WebRtcEngine { pc }))
    }
}

/// Liest alle 20ms die aufgenommenen Frames eines Tracks, bis er gestoppt wird
fn spawn_frame_pump(track: LocalTrack) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(FRAME_DURATION);
        let mut frames: u64 = 0;

        while !track.is_stopped() {
            ticker.tick().await;
            while let Some(_frame) = track.read_frame() {
                // TODO: Opus-encode the frame and write it to the RTP track
                frames += 1;
            }
        }
        tracing::debug!("Frame pump for {} finished after {} frame(s)", track.id(), frames);
    });
}

/// Leitet die Callbacks der Peer Connection in die Event-Queue der Session
fn register_handlers(pc: &Arc<RTCPeerConnection>, events: EngineEvents) {
    let call_id = events.call_id();

    // ICE Candidate Handler
    let events_clone = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(c) = candidate {
            match c.to_json() {
                Ok(init) => events_clone.emit(EngineEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    // ICE State Handler
    let events_clone = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
        tracing::info!("ICE connection state for call {}: {}", call_id, s);
        if let Some(state) = map_ice_state(s) {
            events_clone.emit(EngineEvent::IceStateChanged(state));
        }
        Box::pin(async {})
    }));

    // Track Handler (eingehendes Audio)
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
        tracing::info!("Received remote track: {:?}", track.kind());

        let (tx, rx) = mpsc::channel::<Vec<u8>>(REMOTE_PACKET_BUFFER);
        events.emit(EngineEvent::RemoteTrack(RemoteStream {
            stream_id: track.stream_id(),
            track_id: track.id(),
            packets: Some(rx),
        }));

        tokio::spawn(async move {
            while let Ok((packet, _)) = track.read_rtp().await {
                if packet.payload.is_empty() {
                    continue;
                }
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    tx.try_send(packet.payload.to_vec())
                {
                    break;
                }
            }
            tracing::debug!("Remote track reader finished");
        });

        Box::pin(async {})
    }));
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceState> {
    match state {
        RTCIceConnectionState::New => Some(IceState::New),
        RTCIceConnectionState::Checking => Some(IceState::Checking),
        RTCIceConnectionState::Connected => Some(IceState::Connected),
        RTCIceConnectionState::Completed => Some(IceState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceState::Failed),
        RTCIceConnectionState::Closed => Some(IceState::Closed),
        _ => None,
    }
}

fn webrtc_error(e: webrtc::Error) -> NegotiationError {
    NegotiationError::WebRTC(e.to_string())
}

// ============================================================================
// ENGINE
// ============================================================================

/// Peer Connection eines Anrufs
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcEngine {
    fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
        let result = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        };
        result.map_err(|e| NegotiationError::InvalidSdp(e.to_string()))
    }

    fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
        match description.sdp_type {
            RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
            RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
            other => Err(NegotiationError::InvalidSdp(format!(
                "unexpected description type {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_error)?;
        Self::from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_error)?;
        Self::from_rtc(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = Self::to_rtc(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(webrtc_error)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let description = Self::to_rtc(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(webrtc_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CandidateError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| CandidateError(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Error while closing peer connection: {}", e);
        }
    }
}

impl std::fmt::Debug for WebRtcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcEngine")
            .field("connection_state", &self.pc.connection_state())
            .finish()
    }
}
