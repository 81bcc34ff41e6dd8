//! Relay signaling: wire protocol and the reconnecting WebSocket channel.

pub mod channel;
pub mod protocol;

pub use channel::{ChannelStatus, ReconnectPolicy, SignalSink, SignalingChannel, SignalingEvent};
pub use protocol::{
    CandidatePayload, ChatPayload, IceCandidate, JoinPayload, PeerPayload, RelayErrorPayload,
    SdpKind, SdpPayload, Sender, SessionDescription, SignalMessage,
};
