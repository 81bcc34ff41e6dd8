// In-memory doubles for every capability the session depends on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tutor_shared::types::IceServer;
use tutor_shared::AppError;

use crate::error::{CallError, MediaAccessError};
use crate::events::EventBus;
use crate::media::{LocalMedia, LocalTrack, MediaConstraints, MediaDevices, TrackKind};
use crate::peer::{PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory};
use crate::rooms::RoomsApi;
use crate::session::{CallSession, SessionConfig, SessionDeps};
use crate::signaling::channel::SignalSink;
use crate::signaling::protocol::{
    CandidatePayload, ChatPayload, IceCandidate, SdpKind, SdpPayload, Sender, SessionDescription,
    SignalMessage,
};

pub const USER: &str = "student-1";
pub const COMPANION: &str = "tutor-1";
pub const ROOM: &str = "room-abc";

// ─── Media ──────────────────────────────────────────────────────────────────

pub struct FakeDevices {
    pub outcome: Result<(), MediaAccessError>,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaAccessError> {
        self.outcome.clone()?;
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio));
        }
        if constraints.video.is_some() {
            tracks.push(LocalTrack::new(TrackKind::Video));
        }
        Ok(LocalMedia::new(tracks))
    }
}

// ─── Peer link ──────────────────────────────────────────────────────────────

/// Records every call made on the links it creates.
#[derive(Default)]
pub struct FakePeerFactory {
    log: Arc<Mutex<Vec<String>>>,
    sinks: Mutex<Vec<PeerEventSink>>,
    fail_create: AtomicBool,
}

impl FakePeerFactory {
    /// Make every following `create` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.fail_create.store(failing, Ordering::SeqCst);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Post an event as the most recently created link would.
    pub fn post(&self, event: PeerEvent) {
        let sinks = self.sinks.lock().unwrap();
        sinks.last().expect("no link created").post(event);
    }
}

#[async_trait]
impl PeerLinkFactory for FakePeerFactory {
    async fn create(
        &self,
        _ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, CallError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::negotiation("peer connection setup failed"));
        }
        self.sinks.lock().unwrap().push(events);
        Ok(Box::new(FakePeer { log: Arc::clone(&self.log) }))
    }
}

struct FakePeer {
    log: Arc<Mutex<Vec<String>>>,
}

impl FakePeer {
    fn record(&self, line: impl Into<String>) {
        self.log.lock().unwrap().push(line.into());
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), CallError> {
        self.record(format!("add_track:{}", track.kind()));
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<SessionDescription, CallError> {
        self.record("offer");
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_local_answer(&self) -> Result<SessionDescription, CallError> {
        self.record("answer");
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError> {
        if description.sdp.trim().is_empty() {
            return Err(CallError::invalid_description("empty sdp"));
        }
        let kind = match description.kind {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        };
        self.record(format!("remote:{kind}"));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record("close");
    }
}

// ─── Signaling ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSignals {
    sent: Mutex<Vec<SignalMessage>>,
    closed: AtomicBool,
}

impl RecordingSignals {
    /// Behave like a channel whose task has stopped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl SignalSink for RecordingSignals {
    fn emit(&self, message: SignalMessage) -> Result<(), CallError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CallError::signaling_closed());
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// ─── Backend ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRooms {
    pub fail_create: bool,
    pub fail_delete: bool,
    pub ice_delay: Option<Duration>,
    pub created: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeRooms {
    pub fn created(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoomsApi for FakeRooms {
    async fn create_room(&self, user_id: &str, companion_id: &str) -> Result<String, AppError> {
        if self.fail_create {
            return Err(AppError::Status {
                status: 500,
                message: "Failed to create room".into(),
            });
        }
        self.created
            .lock()
            .unwrap()
            .push((user_id.to_string(), companion_id.to_string()));
        Ok(ROOM.to_string())
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), AppError> {
        if self.fail_delete {
            return Err(AppError::Status {
                status: 404,
                message: "Room not found".into(),
            });
        }
        self.deleted.lock().unwrap().push(room_id.to_string());
        Ok(())
    }

    async fn ice_servers(&self) -> Vec<IceServer> {
        if let Some(delay) = self.ice_delay {
            tokio::time::sleep(delay).await;
        }
        vec![IceServer::stun(tutor_shared::types::DEFAULT_STUN_URL)]
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

pub struct Harness {
    pub session: CallSession,
    pub bus: EventBus,
    pub peers: Arc<FakePeerFactory>,
    pub rooms: Arc<FakeRooms>,
    pub signals: Arc<RecordingSignals>,
}

pub struct HarnessParts {
    pub config: SessionConfig,
    pub deps: SessionDeps,
    pub peers: Arc<FakePeerFactory>,
    pub rooms: Arc<FakeRooms>,
    pub signals: Arc<RecordingSignals>,
}

/// Fakes wired together, without a session, for driving the coordinator.
pub fn parts(companion: Option<&str>, rooms: FakeRooms, devices: FakeDevices) -> HarnessParts {
    let peers = Arc::new(FakePeerFactory::default());
    let rooms = Arc::new(rooms);
    let signals = Arc::new(RecordingSignals::default());
    let deps = SessionDeps {
        media: Arc::new(devices),
        peers: peers.clone(),
        rooms: rooms.clone(),
        signals: signals.clone(),
    };
    HarnessParts {
        config: SessionConfig {
            user_id: USER.to_string(),
            companion_id: companion.map(str::to_string),
        },
        deps,
        peers,
        rooms,
        signals,
    }
}

impl Harness {
    fn build(companion: Option<&str>, rooms: FakeRooms, devices: FakeDevices) -> Self {
        let p = parts(companion, rooms, devices);
        let bus = EventBus::new();
        let (peer_tx, _) = mpsc::unbounded_channel();
        let session = CallSession::new(p.config, p.deps, bus.clone(), peer_tx);
        Self {
            session,
            bus,
            peers: p.peers,
            rooms: p.rooms,
            signals: p.signals,
        }
    }

    pub fn new() -> Self {
        Self::build(Some(COMPANION), FakeRooms::default(), FakeDevices { outcome: Ok(()) })
    }

    pub fn with_companion(companion: Option<&str>) -> Self {
        Self::build(companion, FakeRooms::default(), FakeDevices { outcome: Ok(()) })
    }

    pub fn with_rooms(rooms: FakeRooms) -> Self {
        Self::build(Some(COMPANION), rooms, FakeDevices { outcome: Ok(()) })
    }

    pub fn with_devices(outcome: Result<(), MediaAccessError>) -> Self {
        Self::build(Some(COMPANION), FakeRooms::default(), FakeDevices { outcome })
    }

    /// Media acquired and `ROOM` joined with a live (fake) peer link.
    pub async fn joined() -> Self {
        let mut h = Self::new();
        h.session
            .acquire_local_media(MediaConstraints::default())
            .await
            .unwrap();
        h.join().await;
        h
    }

    pub async fn join(&mut self) {
        let generation = self.session.begin_join(ROOM).unwrap();
        self.session.complete_join(generation, Vec::new()).await.unwrap();
    }
}

// ─── Signal builders ────────────────────────────────────────────────────────

pub fn offer(room: &str, from: &str) -> SignalMessage {
    SignalMessage::Offer(SdpPayload {
        room_id: room.to_string(),
        sdp: SessionDescription::offer("v=0 remote-offer"),
        from: from.to_string(),
    })
}

pub fn candidate(room: &str, from: &str, candidate: &str) -> SignalMessage {
    SignalMessage::Candidate(CandidatePayload {
        room_id: room.to_string(),
        candidate: IceCandidate {
            candidate: candidate.to_string(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        },
        from: from.to_string(),
    })
}

/// A tutor reply, as the relay delivers it.
pub fn chat(room: &str, text: &str) -> SignalMessage {
    SignalMessage::Message(ChatPayload {
        room_id: room.to_string(),
        message: text.to_string(),
        sender: Sender::Ai,
        timestamp: None,
        audio_url: None,
        video_url: None,
        from: None,
    })
}
