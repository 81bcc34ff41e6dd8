// Call event bus.
//
// The coordinator publishes every discrete change the view may want to
// render (phase transitions, transcript lines, errors, suggestions) as a
// `CallEvent` on a broadcast channel. Continuous state lives in the session
// snapshot; events are for things that happen once.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use crate::media::TrackKind;
use crate::session::ConnectionPhase;
use crate::signaling::ChannelStatus;
use crate::suggestions::Suggestion;
use crate::transcript::TranscriptEntry;

// ─── Event kinds ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum CallEvent {
    PhaseChanged(ConnectionPhase),
    LocalMediaReady { tracks: usize },
    RoomCreated { room_id: String },
    Joined { room_id: String },
    PeerJoined { user_id: String },
    PeerLeft { user_id: String },
    RemoteTrack { id: String, kind: TrackKind },
    TranscriptAppended(TranscriptEntry),
    Suggestions(Vec<Suggestion>),
    SignalingStatus(ChannelStatus),
    Error { code: String, message: String },
    CallEnded { room_id: Option<String> },
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhaseChanged(_) => "phase.changed",
            Self::LocalMediaReady { .. } => "media.ready",
            Self::RoomCreated { .. } => "room.created",
            Self::Joined { .. } => "room.joined",
            Self::PeerJoined { .. } => "peer.joined",
            Self::PeerLeft { .. } => "peer.left",
            Self::RemoteTrack { .. } => "track.remote",
            Self::TranscriptAppended(_) => "transcript.appended",
            Self::Suggestions(_) => "suggestions",
            Self::SignalingStatus(_) => "signaling.status",
            Self::Error { .. } => "error",
            Self::CallEnded { .. } => "call.ended",
        }
    }
}

// ─── Envelope ───────────────────────────────────────────────────────────────

/// A published event with its identity (`evt_<uuid-v4>`) and timestamp.
#[derive(Debug, Clone)]
pub struct CallEventEnvelope {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub event: CallEvent,
}

impl CallEventEnvelope {
    fn new(event: CallEvent) -> Self {
        Self {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            created_at: Utc::now(),
            event,
        }
    }
}

// ─── EventBus ───────────────────────────────────────────────────────────────

/// Broadcast fan-out of call events. Slow subscribers skip events
/// (`RecvError::Lagged`) rather than stall the coordinator.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CallEventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(cap: usize) -> Self {
        let (tx, _) = broadcast::channel(cap);
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn emit(&self, event: CallEvent) -> usize {
        let envelope = CallEventEnvelope::new(event);
        debug!(event = envelope.event.name(), event_id = %envelope.id, "call event");
        // No subscribers is normal before the view attaches.
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
