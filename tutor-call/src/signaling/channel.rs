// Reconnecting WebSocket client for the signaling relay.
//
// One background task owns the socket. Outbound messages go through an
// unbounded queue that survives reconnects, so anything emitted while the
// link is down is flushed after the next successful connect. Inbound frames
// and connection status changes are forwarded to a single event receiver.
//
// Rooms are not rejoined after a reconnect; the relay has forgotten us and
// the coordinator decides what to do.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::signaling::protocol::SignalMessage;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─── Public types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    /// Reconnect attempts are exhausted. No further events follow.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Status(ChannelStatus),
    Message(SignalMessage),
}

/// Outbound half of a signaling transport.
pub trait SignalSink: Send + Sync {
    fn emit(&self, message: SignalMessage) -> Result<(), CallError>;
}

/// Fixed-delay reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1000),
        }
    }
}

// ─── SignalingChannel ───────────────────────────────────────────────────────

/// Handle to the relay connection. Cheap to clone.
#[derive(Clone)]
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<SignalMessage>,
    cancel: CancellationToken,
}

impl SignalingChannel {
    /// Start the connection task. Returns immediately; the first
    /// `Status(Connected)` arrives on the receiver once the socket is up.
    pub fn connect(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run(url.into(), policy, events_tx, outbound_rx, cancel.clone()));

        (Self { outbound, cancel }, events_rx)
    }

    /// Close the socket and stop reconnecting.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

impl SignalSink for SignalingChannel {
    fn emit(&self, message: SignalMessage) -> Result<(), CallError> {
        if self.cancel.is_cancelled() {
            return Err(CallError::signaling_closed());
        }
        self.outbound
            .send(message)
            .map_err(|_| CallError::signaling_closed())
    }
}

// ─── Connection task ────────────────────────────────────────────────────────

enum PumpOutcome {
    Cancelled,
    Lost(String),
}

async fn run(
    url: String,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<SignalingEvent>,
    mut outbound: mpsc::UnboundedReceiver<SignalMessage>,
    cancel: CancellationToken,
) {
    let status = |s: ChannelStatus| {
        let _ = events.send(SignalingEvent::Status(s));
    };

    // Message taken off the queue whose write failed; retried first.
    let mut unsent: Option<SignalMessage> = None;
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            res = connect_async(url.as_str()) => res,
        };

        let reason = match connected {
            Ok((socket, _)) => {
                info!(url = %url, "signaling connected");
                attempt = 0;
                status(ChannelStatus::Connected);

                match pump(socket, &mut outbound, &mut unsent, &events, &cancel).await {
                    PumpOutcome::Cancelled => break,
                    PumpOutcome::Lost(reason) => {
                        warn!(url = %url, reason = %reason, "signaling connection lost");
                        status(ChannelStatus::Disconnected { reason: reason.clone() });
                        reason
                    }
                }
            }
            Err(e) => {
                warn!(url = %url, attempt, error = %e, "signaling connect failed");
                e.to_string()
            }
        };

        attempt += 1;
        if attempt > policy.max_attempts {
            warn!(url = %url, attempts = policy.max_attempts, "signaling reconnect attempts exhausted");
            status(ChannelStatus::Failed { reason });
            return;
        }

        status(ChannelStatus::Reconnecting { attempt });
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }

    debug!(url = %url, "signaling channel closed");
}

async fn pump(
    socket: Socket,
    outbound: &mut mpsc::UnboundedReceiver<SignalMessage>,
    unsent: &mut Option<SignalMessage>,
    events: &mpsc::UnboundedSender<SignalingEvent>,
    cancel: &CancellationToken,
) -> PumpOutcome {
    let (mut write, mut read) = socket.split();

    if let Some(msg) = unsent.take() {
        if let Err(reason) = write_message(&mut write, &msg).await {
            *unsent = Some(msg);
            return PumpOutcome::Lost(reason);
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return PumpOutcome::Cancelled;
            }

            next = outbound.recv() => {
                let Some(msg) = next else {
                    // Every handle is gone.
                    let _ = write.send(Message::Close(None)).await;
                    return PumpOutcome::Cancelled;
                };
                if let Err(reason) = write_message(&mut write, &msg).await {
                    *unsent = Some(msg);
                    return PumpOutcome::Lost(reason);
                }
            }

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => forward(&text, events),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => forward(&text, events),
                    Err(_) => debug!("ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by relay".to_string());
                    return PumpOutcome::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpOutcome::Lost(e.to_string()),
                None => return PumpOutcome::Lost("stream ended".to_string()),
            },
        }
    }
}

async fn write_message<S>(write: &mut S, msg: &SignalMessage) -> Result<(), String>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    debug!(event = msg.kind(), "signal out");
    write.send(Message::Text(text)).await.map_err(|e| e.to_string())
}

fn forward(text: &str, events: &mpsc::UnboundedSender<SignalingEvent>) {
    match serde_json::from_str::<SignalMessage>(text) {
        Ok(msg) => {
            debug!(event = msg.kind(), "signal in");
            let _ = events.send(SignalingEvent::Message(msg));
        }
        Err(e) => warn!(error = %e, "dropping malformed signaling frame"),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
