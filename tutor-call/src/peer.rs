// Peer link: the single media transport between the user and the tutor.
//
// `PeerLink` is the seam the session drives; `RtcPeerLink` is the webrtc-rs
// implementation. Connection callbacks never touch session state directly,
// they are posted as `PeerEvent`s tagged with the link generation so the
// coordinator can discard anything a torn-down link still reports.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

use tutor_shared::types::IceServer;

use crate::error::CallError;
use crate::media::{LocalTrack, TrackKind};
use crate::signaling::protocol::{IceCandidate, SdpKind, SessionDescription};

// ─── Events ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    StateChanged(PeerState),
    LocalCandidate(IceCandidate),
    RemoteTrack { id: String, kind: TrackKind },
}

/// Where a link posts its callbacks. Each link gets its own generation.
#[derive(Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn post(&self, event: PeerEvent) {
        // The coordinator may already be gone during shutdown.
        let _ = self.tx.send((self.generation, event));
    }
}

// ─── Capability ─────────────────────────────────────────────────────────────

#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), CallError>;

    /// Create an offer and install it as the local description.
    async fn create_local_offer(&self) -> Result<SessionDescription, CallError>;

    /// Create an answer and install it as the local description.
    async fn create_local_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;

    async fn close(&self);
}

#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, CallError>;
}

// ─── webrtc-rs implementation ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerLinkFactory for RtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, CallError> {
        let pc = new_peer_connection(ice_servers)
            .await
            .map_err(|e| CallError::negotiation(format!("peer connection setup failed: {e}")))?;

        wire_callbacks(&pc, events);
        info!(ice_servers = ice_servers.len(), "peer link created");
        Ok(Box::new(RtcPeerLink { pc }))
    }
}

async fn new_peer_connection(ice_servers: &[IceServer]) -> Result<Arc<RTCPeerConnection>, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
        ..Default::default()
    };

    Ok(Arc::new(api.new_peer_connection(config).await?))
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.to_vec(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, events: PeerEventSink) {
    let sink = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        debug!(generation = sink.generation(), state = %state, "peer state changed");
        sink.post(PeerEvent::StateChanged(state.into()));
        Box::pin(async {})
    }));

    let sink = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let sink = sink.clone();
        Box::pin(async move {
            // `None` marks the end of gathering.
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => sink.post(PeerEvent::LocalCandidate(from_rtc_candidate(init))),
                Err(e) => warn!(error = %e, "failed to serialise local candidate"),
            }
        })
    }));

    let sink = events;
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let sink = sink.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            info!(track_id = %track.id(), kind = %kind, ssrc = track.ssrc(), "remote track received");
            sink.post(PeerEvent::RemoteTrack { id: track.id(), kind });

            // Keep the receive pipeline draining until the track ends.
            tokio::spawn(async move {
                while track.read_rtp().await.is_ok() {}
            });
        })
    }));
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), CallError> {
        let Some(rtc) = track.rtc() else {
            debug!(track_id = %track.id(), "track has no rtc counterpart, skipping");
            return Ok(());
        };

        let sender = self
            .pc
            .add_track(Arc::clone(rtc) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| CallError::negotiation(format!("add_track({}) failed: {e}", track.kind())))?;

        // RTCP must be read for interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::negotiation(format!("create_offer failed: {e}")))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| CallError::negotiation(format!("set_local_description failed: {e}")))?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_local_answer(&self) -> Result<SessionDescription, CallError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::negotiation(format!("create_answer failed: {e}")))?;
        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| CallError::negotiation(format!("set_local_description failed: {e}")))?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError> {
        let parsed = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| CallError::invalid_description(e.to_string()))?;

        self.pc
            .set_remote_description(parsed)
            .await
            .map_err(|e| CallError::invalid_description(format!("set_remote_description failed: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|e| CallError::invalid_candidate(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "peer link close failed");
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaConstraints, MediaDevices, SampleTrackDevices};
    use tutor_shared::types::DEFAULT_STUN_URL;

    #[test]
    fn state_mapping_from_rtc() {
        assert_eq!(PeerState::from(RTCPeerConnectionState::Unspecified), PeerState::New);
        assert_eq!(PeerState::from(RTCPeerConnectionState::Failed), PeerState::Failed);
        assert_eq!(PeerState::from(RTCPeerConnectionState::Closed), PeerState::Closed);
    }

    #[test]
    fn candidate_conversion_keeps_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };
        assert_eq!(from_rtc_candidate(to_rtc_candidate(candidate.clone())), candidate);
    }

    #[test]
    fn ice_server_conversion() {
        let turn = IceServer {
            urls: tutor_shared::types::IceUrls::Many(vec!["turn:t.example:3478".into()]),
            username: Some("u".into()),
            credential: Some("p".into()),
        };
        let rtc = to_rtc_ice_server(&turn);
        assert_eq!(rtc.urls, vec!["turn:t.example:3478".to_string()]);
        assert_eq!(rtc.username, "u");
        assert_eq!(to_rtc_ice_server(&IceServer::stun(DEFAULT_STUN_URL)).credential, "");
    }

    #[tokio::test]
    async fn offer_answer_between_two_links() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let caller = RtcPeerFactory.create(&[], PeerEventSink::new(1, tx.clone())).await.unwrap();
        let callee = RtcPeerFactory.create(&[], PeerEventSink::new(2, tx)).await.unwrap();

        let media = SampleTrackDevices::default()
            .acquire(&MediaConstraints::default())
            .await
            .unwrap();
        for track in media.tracks() {
            caller.add_local_track(track).await.unwrap();
        }

        let offer = caller.create_local_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));

        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_local_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        caller.set_remote_description(answer).await.unwrap();

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn garbage_sdp_is_a_negotiation_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = RtcPeerFactory.create(&[], PeerEventSink::new(1, tx)).await.unwrap();
        let err = link
            .set_remote_description(SessionDescription::offer("not sdp"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Negotiation { .. }));
        link.close().await;
    }
}
