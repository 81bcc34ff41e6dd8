// Call session state machine.
//
// `CallSession` owns everything about one call: room membership, local
// media, the peer link, the transcript and the current error. It is driven
// from a single task (see `coordinator`), so every method takes `&mut self`
// and no locking is needed. Inputs arrive as commands, signaling events and
// peer-link events; outputs are outbound signals and `CallEvent`s.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tutor_shared::types::IceServer;

use crate::error::CallError;
use crate::events::{CallEvent, EventBus};
use crate::media::{LocalMedia, MediaConstraints, MediaDevices, TrackKind};
use crate::peer::{PeerEvent, PeerEventSink, PeerLink, PeerLinkFactory, PeerState};
use crate::rooms::RoomsApi;
use crate::signaling::channel::{ChannelStatus, SignalSink, SignalingEvent};
use crate::signaling::protocol::{
    CandidatePayload, ChatPayload, IceCandidate, JoinPayload, PeerPayload, SdpKind, SdpPayload,
    Sender, SessionDescription, SignalMessage,
};
use crate::suggestions::suggestions_for;
use crate::transcript::{Transcript, TranscriptEntry};

/// Signals for the joined room that arrive before the peer link exists.
pub const PENDING_SIGNAL_CAPACITY: usize = 64;

/// Remote candidates that arrive before the remote description is set.
pub const PENDING_CANDIDATE_CAPACITY: usize = 64;

const JOIN_ROLE: &str = "user";

// ─── Public types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Connected,
    /// Terminal until the call is ended.
    Disconnected,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_id: String,
    pub companion_id: Option<String>,
}

/// Capabilities the session talks to. Every one is replaceable in tests.
#[derive(Clone)]
pub struct SessionDeps {
    pub media: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerLinkFactory>,
    pub rooms: Arc<dyn RoomsApi>,
    pub signals: Arc<dyn SignalSink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub code: String,
    pub message: String,
}

/// Read-only view of the session, published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub room_id: Option<String>,
    pub joined: bool,
    pub phase: ConnectionPhase,
    pub mic_enabled: Option<bool>,
    pub camera_enabled: Option<bool>,
    pub remote_tracks: usize,
    pub transcript_len: usize,
    pub error: Option<ErrorBanner>,
    pub connected_since: Option<DateTime<Utc>>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            room_id: None,
            joined: false,
            phase: ConnectionPhase::Idle,
            mic_enabled: None,
            camera_enabled: None,
            remote_tracks: 0,
            transcript_len: 0,
            error: None,
            connected_since: None,
        }
    }
}

// ─── CallSession ────────────────────────────────────────────────────────────

pub struct CallSession {
    config: SessionConfig,
    deps: SessionDeps,
    bus: EventBus,
    peer_events: mpsc::UnboundedSender<(u64, PeerEvent)>,

    room_id: Option<String>,
    joined: bool,
    phase: ConnectionPhase,
    connected_since: Option<DateTime<Utc>>,

    local_media: Option<LocalMedia>,
    remote_tracks: Vec<(String, TrackKind)>,

    peer: Option<Box<dyn PeerLink>>,
    /// Bumped on every join and every end; events tagged with an older value
    /// belong to a link that no longer exists.
    generation: u64,
    has_remote_description: bool,
    offer_sent: bool,
    pending_signals: VecDeque<SignalMessage>,
    pending_candidates: VecDeque<IceCandidate>,

    transcript: Transcript,
    error: Option<CallError>,
}

impl CallSession {
    pub fn new(
        config: SessionConfig,
        deps: SessionDeps,
        bus: EventBus,
        peer_events: mpsc::UnboundedSender<(u64, PeerEvent)>,
    ) -> Self {
        Self {
            config,
            deps,
            bus,
            peer_events,
            room_id: None,
            joined: false,
            phase: ConnectionPhase::Idle,
            connected_since: None,
            local_media: None,
            remote_tracks: Vec::new(),
            peer: None,
            generation: 0,
            has_remote_description: false,
            offer_sent: false,
            pending_signals: VecDeque::new(),
            pending_candidates: VecDeque::new(),
            transcript: Transcript::new(),
            error: None,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn local_media(&self) -> Option<&LocalMedia> {
        self.local_media.as_ref()
    }

    pub fn error(&self) -> Option<&CallError> {
        self.error.as_ref()
    }

    pub fn pending_signal_count(&self) -> usize {
        self.pending_signals.len()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let enabled = |kind: TrackKind| {
            self.local_media
                .as_ref()
                .and_then(|m| m.first(kind))
                .map(|t| t.is_enabled())
        };
        SessionSnapshot {
            room_id: self.room_id.clone(),
            joined: self.joined,
            phase: self.phase,
            mic_enabled: enabled(TrackKind::Audio),
            camera_enabled: enabled(TrackKind::Video),
            remote_tracks: self.remote_tracks.len(),
            transcript_len: self.transcript.len(),
            error: self.error.as_ref().map(|e| ErrorBanner {
                code: e.code().to_string(),
                message: e.user_message().to_string(),
            }),
            connected_since: self.connected_since,
        }
    }

    // ─── Operations ─────────────────────────────────────────────────────

    /// Open the camera and microphone. Replaces (and stops) any earlier set.
    pub async fn acquire_local_media(&mut self, constraints: MediaConstraints) -> Result<usize, CallError> {
        let media = Arc::clone(&self.deps.media);
        let acquired = media.acquire(&constraints).await;
        let media = acquired.map_err(|e| self.fail(e.into()))?;

        let tracks = media.tracks().len();
        if let Some(previous) = self.local_media.replace(media) {
            previous.stop_all();
        }
        if self.peer.is_some() {
            warn!("local media acquired after the peer link was created; tracks are not renegotiated");
        }
        self.bus.emit(CallEvent::LocalMediaReady { tracks });
        Ok(tracks)
    }

    /// Create a backend room for the configured user and companion.
    pub async fn create_room(&mut self) -> Result<String, CallError> {
        let companion_id = match self.config.companion_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(self.fail(CallError::companion_required())),
        };
        if let Some(existing) = self.room_id.clone() {
            return Err(self.fail(CallError::AlreadyInRoom(existing)));
        }

        let rooms = Arc::clone(&self.deps.rooms);
        let created = rooms.create_room(&self.config.user_id, &companion_id).await;
        let room_id = created.map_err(|e| self.fail(CallError::room_creation(&e)))?;

        info!(room_id = %room_id, companion_id = %companion_id, "room created");
        self.room_id = Some(room_id.clone());
        self.bus.emit(CallEvent::RoomCreated { room_id: room_id.clone() });
        Ok(room_id)
    }

    /// First half of a join: claim the room and start routing its signals.
    /// Returns the generation the peer link must be created under.
    pub fn begin_join(&mut self, room_id: &str) -> Result<u64, CallError> {
        if self.joined {
            let current = self.room_id.clone().unwrap_or_default();
            return Err(self.fail(CallError::AlreadyInRoom(current)));
        }
        if room_id.trim().is_empty() {
            return Err(self.fail(CallError::relay_rejected("room id must not be empty")));
        }
        // A created room is the only one this session may join.
        if let Some(existing) = self.room_id.clone().filter(|r| r != room_id) {
            return Err(self.fail(CallError::AlreadyInRoom(existing)));
        }

        self.generation += 1;
        self.room_id = Some(room_id.to_string());
        self.joined = true;
        self.has_remote_description = false;
        self.offer_sent = false;
        self.pending_signals.clear();
        self.pending_candidates.clear();
        self.remote_tracks.clear();
        self.transcript = Transcript::new();
        self.set_phase(ConnectionPhase::Connecting);

        info!(room_id = %room_id, generation = self.generation, "joining room");
        Ok(self.generation)
    }

    /// Second half of a join, once ICE servers are known: create the peer
    /// link, attach local tracks, announce ourselves and replay early signals.
    pub async fn complete_join(&mut self, generation: u64, ice_servers: Vec<IceServer>) -> Result<(), CallError> {
        if generation != self.generation || !self.joined {
            debug!(generation, current = self.generation, "join superseded");
            return Err(CallError::Ended);
        }
        let Some(room_id) = self.room_id.clone() else {
            return Err(CallError::Ended);
        };

        let factory = Arc::clone(&self.deps.peers);
        let sink = PeerEventSink::new(generation, self.peer_events.clone());
        let peer = match factory.create(&ice_servers, sink).await {
            Ok(peer) => peer,
            Err(e) => return Err(self.abort_join(e).await),
        };

        let tracks = self
            .local_media
            .as_ref()
            .map(|m| m.tracks().to_vec())
            .unwrap_or_default();
        for track in &tracks {
            if let Err(e) = peer.add_local_track(track).await {
                peer.close().await;
                return Err(self.abort_join(e).await);
            }
        }
        self.peer = Some(peer);

        let join = SignalMessage::Join(JoinPayload {
            room_id: room_id.clone(),
            user_id: self.config.user_id.clone(),
            role: JOIN_ROLE.to_string(),
        });
        if let Err(e) = self.deps.signals.emit(join) {
            return Err(self.abort_join(e).await);
        }
        self.bus.emit(CallEvent::Joined { room_id: room_id.clone() });

        let queued: Vec<SignalMessage> = self.pending_signals.drain(..).collect();
        if !queued.is_empty() {
            debug!(room_id = %room_id, count = queued.len(), "replaying early signals");
        }
        for msg in queued {
            self.handle_signal(msg).await;
        }
        Ok(())
    }

    /// Append a user line and send it to the room, as typed. Returns `false`
    /// when there was nothing to send.
    pub fn send_message(&mut self, text: &str) -> Result<bool, CallError> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        let Some(room_id) = self.room_id.clone().filter(|_| self.joined) else {
            debug!("message dropped: not in a room");
            return Ok(false);
        };

        let entry = TranscriptEntry::user(text);
        let payload = ChatPayload {
            room_id,
            message: entry.text.clone(),
            sender: Sender::User,
            timestamp: Some(entry.epoch_seconds()),
            audio_url: None,
            video_url: None,
            from: Some(self.config.user_id.clone()),
        };
        self.append(entry);

        match self.deps.signals.emit(SignalMessage::Message(payload)) {
            Ok(()) => Ok(true),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn toggle_mic(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    pub fn toggle_camera(&mut self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let enabled = self.local_media.as_ref()?.toggle(kind)?;
        debug!(kind = %kind, enabled, "local track toggled");
        Some(enabled)
    }

    /// Tear the call down. Safe in any phase and safe to repeat.
    pub async fn end_call(&mut self) {
        let active = self.joined || self.room_id.is_some() || self.local_media.is_some() || self.peer.is_some();

        // Invalidates a pending join and any late link callbacks.
        self.generation += 1;

        if let Some(media) = self.local_media.take() {
            let stopped = media.stop_all();
            debug!(stopped, "local media released");
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }

        let room_id = self.room_id.take();
        if let Some(room) = &room_id {
            if self.joined {
                let leave = SignalMessage::Leave(PeerPayload {
                    room_id: room.clone(),
                    user_id: self.config.user_id.clone(),
                });
                if let Err(e) = self.deps.signals.emit(leave) {
                    warn!(room_id = %room, error = %e, "leave not sent");
                }
            }
            let rooms = Arc::clone(&self.deps.rooms);
            if let Err(e) = rooms.delete_room(room).await {
                warn!(room_id = %room, error = %e, "room deletion failed");
            }
        }

        self.joined = false;
        self.has_remote_description = false;
        self.offer_sent = false;
        self.pending_signals.clear();
        self.pending_candidates.clear();
        self.remote_tracks.clear();
        self.connected_since = None;
        self.set_phase(ConnectionPhase::Idle);

        if active {
            info!(room_id = ?room_id, "call ended");
            self.bus.emit(CallEvent::CallEnded { room_id });
        }
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    // ─── Inputs ─────────────────────────────────────────────────────────

    pub async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Status(status) => {
                match &status {
                    ChannelStatus::Failed { reason } => {
                        self.fail(CallError::signaling_unavailable(reason.clone()));
                    }
                    ChannelStatus::Connected if self.joined => {
                        warn!(room_id = ?self.room_id, "signaling reconnected; room membership is not restored");
                    }
                    _ => {}
                }
                self.bus.emit(CallEvent::SignalingStatus(status));
            }
            SignalingEvent::Message(msg) => self.handle_signal(msg).await,
        }
    }

    pub async fn handle_signal(&mut self, msg: SignalMessage) {
        if let SignalMessage::Error(err) = &msg {
            self.fail(CallError::relay_rejected(err.message.clone()));
            return;
        }

        let Some(room_id) = self.room_id.clone().filter(|_| self.joined) else {
            debug!(event = msg.kind(), "signal ignored: not in a room");
            return;
        };
        if msg.room_id() != Some(room_id.as_str()) {
            debug!(event = msg.kind(), room_id = ?msg.room_id(), "signal for another room ignored");
            return;
        }
        if msg.origin() == Some(self.config.user_id.as_str()) {
            debug!(event = msg.kind(), "own signal echoed by relay");
            return;
        }

        let kind = msg.kind();
        match msg {
            SignalMessage::Message(chat) => {
                self.append(TranscriptEntry::from_chat(chat));
            }
            SignalMessage::PeerLeft(p) => {
                info!(room_id = %room_id, user_id = %p.user_id, "peer left");
                self.bus.emit(CallEvent::PeerLeft { user_id: p.user_id });
            }
            SignalMessage::Joined(_) | SignalMessage::Join(_) | SignalMessage::Leave(_) => {
                debug!(event = kind, "membership notice ignored");
            }
            SignalMessage::Error(_) => {}
            negotiation if self.peer.is_none() => self.hold(negotiation),
            SignalMessage::PeerJoined(p) => self.on_peer_joined(&room_id, p).await,
            SignalMessage::Offer(p) => self.on_offer(&room_id, p).await,
            SignalMessage::Answer(p) => self.on_answer(p).await,
            SignalMessage::Candidate(p) => self.on_candidate(p.candidate).await,
        }
    }

    pub async fn handle_peer_event(&mut self, generation: u64, event: PeerEvent) {
        if generation != self.generation || self.peer.is_none() {
            debug!(generation, current = self.generation, "stale peer event dropped");
            return;
        }

        match event {
            PeerEvent::StateChanged(state) => self.on_peer_state(state),
            PeerEvent::LocalCandidate(candidate) => {
                let Some(room_id) = self.room_id.clone() else { return };
                let msg = SignalMessage::Candidate(CandidatePayload {
                    room_id,
                    candidate,
                    from: self.config.user_id.clone(),
                });
                if let Err(e) = self.deps.signals.emit(msg) {
                    self.fail(e);
                }
            }
            PeerEvent::RemoteTrack { id, kind } => {
                self.remote_tracks.push((id.clone(), kind));
                self.bus.emit(CallEvent::RemoteTrack { id, kind });
            }
        }
    }

    // ─── Negotiation ────────────────────────────────────────────────────

    fn hold(&mut self, msg: SignalMessage) {
        if self.pending_signals.len() == PENDING_SIGNAL_CAPACITY {
            if let Some(dropped) = self.pending_signals.pop_front() {
                warn!(event = dropped.kind(), "early signal queue full, dropping oldest");
            }
        }
        debug!(event = msg.kind(), "signal held until the peer link exists");
        self.pending_signals.push_back(msg);
    }

    async fn on_peer_joined(&mut self, room_id: &str, peer: PeerPayload) {
        info!(room_id = %room_id, user_id = %peer.user_id, "peer joined");
        self.bus.emit(CallEvent::PeerJoined { user_id: peer.user_id });

        // Whoever has not yet seen a remote description makes the offer.
        if self.has_remote_description || self.offer_sent {
            return;
        }
        let Some(link) = &self.peer else { return };
        let created = link.create_local_offer().await;
        match created {
            Ok(offer) => {
                self.offer_sent = true;
                self.send_description(room_id, offer);
            }
            Err(e) => {
                self.fail(e);
            }
        }
    }

    async fn on_offer(&mut self, room_id: &str, payload: SdpPayload) {
        if payload.sdp.kind != SdpKind::Offer {
            self.fail(CallError::invalid_description("offer event carried an answer"));
            return;
        }
        if !self.apply_remote_description(payload.sdp).await {
            return;
        }

        let Some(link) = &self.peer else { return };
        let created = link.create_local_answer().await;
        match created {
            Ok(answer) => self.send_description(room_id, answer),
            Err(e) => {
                self.fail(e);
            }
        }
    }

    async fn on_answer(&mut self, payload: SdpPayload) {
        if payload.sdp.kind != SdpKind::Answer {
            self.fail(CallError::invalid_description("answer event carried an offer"));
            return;
        }
        self.apply_remote_description(payload.sdp).await;
    }

    async fn on_candidate(&mut self, candidate: IceCandidate) {
        if candidate.is_end_of_candidates() {
            debug!("remote end-of-candidates");
            return;
        }
        if !self.has_remote_description {
            if self.pending_candidates.len() == PENDING_CANDIDATE_CAPACITY {
                self.pending_candidates.pop_front();
                warn!("held candidate queue full, dropping oldest");
            }
            self.pending_candidates.push_back(candidate);
            return;
        }
        let Some(link) = &self.peer else { return };
        let added = link.add_ice_candidate(candidate).await;
        if let Err(e) = added {
            self.fail(e);
        }
    }

    /// Returns whether the description was applied. Held candidates are
    /// flushed right after.
    async fn apply_remote_description(&mut self, description: SessionDescription) -> bool {
        let Some(link) = &self.peer else { return false };
        let applied = link.set_remote_description(description).await;
        if let Err(e) = applied {
            self.fail(e);
            return false;
        }
        self.has_remote_description = true;

        let held = std::mem::take(&mut self.pending_candidates);
        if let Some(link) = &self.peer {
            for candidate in held {
                if let Err(e) = link.add_ice_candidate(candidate).await {
                    warn!(error = %e, "held candidate rejected");
                }
            }
        }
        true
    }

    fn send_description(&mut self, room_id: &str, description: SessionDescription) {
        let payload = SdpPayload {
            room_id: room_id.to_string(),
            sdp: description,
            from: self.config.user_id.clone(),
        };
        let msg = match payload.sdp.kind {
            SdpKind::Offer => SignalMessage::Offer(payload),
            SdpKind::Answer => SignalMessage::Answer(payload),
        };
        if let Err(e) = self.deps.signals.emit(msg) {
            self.fail(e);
        }
    }

    fn on_peer_state(&mut self, state: PeerState) {
        if self.phase == ConnectionPhase::Disconnected {
            debug!(state = ?state, "peer state after disconnect ignored");
            return;
        }
        match state {
            PeerState::New | PeerState::Connecting => self.set_phase(ConnectionPhase::Connecting),
            PeerState::Connected => {
                if self.phase != ConnectionPhase::Connected {
                    self.connected_since = Some(Utc::now());
                }
                self.set_phase(ConnectionPhase::Connected);
            }
            PeerState::Disconnected | PeerState::Failed => self.set_phase(ConnectionPhase::Disconnected),
            // Only our own teardown closes the link.
            PeerState::Closed => {}
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    /// Undo `begin_join` after link setup failed. The room stays claimed so
    /// the caller can retry the join or end the call.
    async fn abort_join(&mut self, err: CallError) -> CallError {
        self.generation += 1;
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.joined = false;
        self.has_remote_description = false;
        self.offer_sent = false;
        self.pending_signals.clear();
        self.pending_candidates.clear();
        self.remote_tracks.clear();
        self.set_phase(ConnectionPhase::Idle);
        warn!(room_id = ?self.room_id, "join aborted");
        self.fail(err)
    }

    fn append(&mut self, entry: TranscriptEntry) {
        let entry = self.transcript.push(entry).clone();
        self.bus.emit(CallEvent::TranscriptAppended(entry));
        if let Some(suggestions) = suggestions_for(&self.transcript) {
            self.bus.emit(CallEvent::Suggestions(suggestions));
        }
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        if self.phase == phase {
            return;
        }
        info!(from = %self.phase, to = %phase, room_id = ?self.room_id, "connection phase changed");
        self.phase = phase;
        self.bus.emit(CallEvent::PhaseChanged(phase));
    }

    /// Record `err` as the current error (latest wins) and hand it back.
    fn fail(&mut self, err: CallError) -> CallError {
        warn!(code = %err.code(), error = %err, "call error");
        self.bus.emit(CallEvent::Error {
            code: err.code().to_string(),
            message: err.user_message().to_string(),
        });
        self.error = Some(err.clone());
        err
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
