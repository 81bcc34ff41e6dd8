// Relay wire protocol.
//
// Every frame is a JSON text message of the shape
//
//     {"event": "<kind>", "data": { ... }}
//
// The relay routes by `room_id` and never inspects SDP or candidates.
// `from` carries the sender's user id so a client can recognise echoes of
// its own messages.

use serde::{Deserialize, Serialize};

// ─── Shared fragments ───────────────────────────────────────────────────────

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// `RTCSessionDescriptionInit` as browsers serialise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// `RTCIceCandidateInit` as browsers serialise it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// An empty candidate string marks end-of-candidates.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

// ─── Payloads ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub room_id: String,
    pub user_id: String,
    pub role: String,
}

/// Used by `joined`, `peer-joined`, `peer-left` and `leave`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerPayload {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub room_id: String,
    pub sdp: SessionDescription,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub room_id: String,
    pub candidate: IceCandidate,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub room_id: String,
    pub message: String,
    pub sender: Sender,
    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayErrorPayload {
    pub message: String,
}

// ─── Envelope ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalMessage {
    Join(JoinPayload),
    Joined(PeerPayload),
    PeerJoined(PeerPayload),
    PeerLeft(PeerPayload),
    Offer(SdpPayload),
    Answer(SdpPayload),
    Candidate(CandidatePayload),
    Message(ChatPayload),
    Leave(PeerPayload),
    Error(RelayErrorPayload),
}

impl SignalMessage {
    /// Event name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Joined(_) => "joined",
            Self::PeerJoined(_) => "peer-joined",
            Self::PeerLeft(_) => "peer-left",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::Candidate(_) => "candidate",
            Self::Message(_) => "message",
            Self::Leave(_) => "leave",
            Self::Error(_) => "error",
        }
    }

    /// Room the message is scoped to. Relay errors are not room-scoped.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::Join(p) => Some(&p.room_id),
            Self::Joined(p) | Self::PeerJoined(p) | Self::PeerLeft(p) | Self::Leave(p) => {
                Some(&p.room_id)
            }
            Self::Offer(p) | Self::Answer(p) => Some(&p.room_id),
            Self::Candidate(p) => Some(&p.room_id),
            Self::Message(p) => Some(&p.room_id),
            Self::Error(_) => None,
        }
    }

    /// User id of the participant that produced the message, when known.
    pub fn origin(&self) -> Option<&str> {
        match self {
            Self::Join(p) => Some(&p.user_id),
            Self::Joined(p) | Self::PeerJoined(p) | Self::PeerLeft(p) | Self::Leave(p) => {
                Some(&p.user_id)
            }
            Self::Offer(p) | Self::Answer(p) => Some(&p.from),
            Self::Candidate(p) => Some(&p.from),
            Self::Message(p) => p.from.as_deref(),
            Self::Error(_) => None,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_uses_browser_field_names() {
        let msg = SignalMessage::Offer(SdpPayload {
            room_id: "room-1".into(),
            sdp: SessionDescription::offer("v=0"),
            from: "u1".into(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"event": "offer", "data": {"room_id": "room-1", "sdp": {"type": "offer", "sdp": "v=0"}, "from": "u1"}})
        );
    }

    #[test]
    fn candidate_parses_camel_case() {
        let raw = r#"{"event":"candidate","data":{"room_id":"r","from":"ai",
            "candidate":{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54400 typ host","sdpMid":"0","sdpMLineIndex":0}}}"#;
        let msg: SignalMessage = serde_json::from_str(raw).unwrap();
        match msg {
            SignalMessage::Candidate(p) => {
                assert_eq!(p.candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(p.candidate.sdp_mline_index, Some(0));
                assert!(p.candidate.username_fragment.is_none());
                assert!(!p.candidate.is_end_of_candidates());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn peer_events_are_kebab_case() {
        let raw = r#"{"event":"peer-joined","data":{"room_id":"r","user_id":"tutor"}}"#;
        let msg: SignalMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind(), "peer-joined");
        assert_eq!(msg.room_id(), Some("r"));
        assert_eq!(msg.origin(), Some("tutor"));
    }

    #[test]
    fn ai_message_with_media_references() {
        let raw = r#"{"event":"message","data":{"room_id":"r","message":"Hi!","sender":"ai",
            "timestamp":1718000000.5,"audio_url":"/media/a.mp3"}}"#;
        let msg: SignalMessage = serde_json::from_str(raw).unwrap();
        let SignalMessage::Message(chat) = msg else { panic!("expected message") };
        assert_eq!(chat.sender, Sender::Ai);
        assert_eq!(chat.audio_url.as_deref(), Some("/media/a.mp3"));
        assert!(chat.video_url.is_none());
        assert!(chat.from.is_none());
    }

    #[test]
    fn relay_error_has_no_room() {
        let msg: SignalMessage =
            serde_json::from_str(r#"{"event":"error","data":{"message":"Room not found"}}"#).unwrap();
        assert_eq!(msg.room_id(), None);
        assert_eq!(msg.kind(), "error");
    }

    #[test]
    fn unknown_event_is_rejected() {
        let res = serde_json::from_str::<SignalMessage>(r#"{"event":"ping","data":{}}"#);
        assert!(res.is_err());
    }
}
