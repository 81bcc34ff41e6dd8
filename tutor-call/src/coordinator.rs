// Call coordinator actor.
//
// A single task owns the `CallSession` and consumes, in one `select!` loop:
// view commands, relay signaling events, peer-link callbacks and internal
// completions (the ICE server fetch that precedes link creation). The view
// talks to it through a cloneable `CallHandle`; when the last handle is
// dropped the call is ended so local tracks are always released.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tutor_shared::types::IceServer;

use crate::error::CallError;
use crate::events::{CallEventEnvelope, EventBus};
use crate::media::MediaConstraints;
use crate::peer::PeerEvent;
use crate::rooms::RoomsApi;
use crate::session::{CallSession, SessionConfig, SessionDeps, SessionSnapshot};
use crate::signaling::channel::SignalingEvent;

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    AcquireLocalMedia { constraints: MediaConstraints, reply: Reply<Result<usize, CallError>> },
    CreateRoom { reply: Reply<Result<String, CallError>> },
    JoinRoom { room_id: String, reply: Reply<Result<(), CallError>> },
    SendMessage { text: String, reply: Reply<Result<bool, CallError>> },
    ToggleMic { reply: Reply<Option<bool>> },
    ToggleCamera { reply: Reply<Option<bool>> },
    EndCall { reply: Reply<()> },
    DismissError { reply: Reply<()> },
}

/// Results of work the actor spawned off its own task.
enum Internal {
    IceServersReady { generation: u64, servers: Vec<IceServer> },
}

// ─── Handle ─────────────────────────────────────────────────────────────────

/// The view's side of the coordinator. Cheap to clone.
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionSnapshot>,
    bus: EventBus,
}

impl CallHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| CallError::Ended)?;
        rx.await.map_err(|_| CallError::Ended)
    }

    pub async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<usize, CallError> {
        self.request(|reply| Command::AcquireLocalMedia { constraints, reply }).await?
    }

    pub async fn create_room(&self) -> Result<String, CallError> {
        self.request(|reply| Command::CreateRoom { reply }).await?
    }

    /// Resolves once the peer link exists and `join` has been sent.
    pub async fn join_room(&self, room_id: impl Into<String>) -> Result<(), CallError> {
        let room_id = room_id.into();
        self.request(|reply| Command::JoinRoom { room_id, reply }).await?
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<bool, CallError> {
        let text = text.into();
        self.request(|reply| Command::SendMessage { text, reply }).await?
    }

    /// New microphone state, or `None` without local audio.
    pub async fn toggle_mic(&self) -> Option<bool> {
        self.request(|reply| Command::ToggleMic { reply }).await.ok().flatten()
    }

    pub async fn toggle_camera(&self) -> Option<bool> {
        self.request(|reply| Command::ToggleCamera { reply }).await.ok().flatten()
    }

    /// Always succeeds; a stopped coordinator has nothing left to end.
    pub async fn end_call(&self) {
        let _ = self.request(|reply| Command::EndCall { reply }).await;
    }

    pub async fn dismiss_error(&self) {
        let _ = self.request(|reply| Command::DismissError { reply }).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEventEnvelope> {
        self.bus.subscribe()
    }
}

// ─── Actor ──────────────────────────────────────────────────────────────────

pub struct CallCoordinator {
    session: CallSession,
    rooms: Arc<dyn RoomsApi>,
    state: watch::Sender<SessionSnapshot>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    /// Join waiting for its ICE servers: generation and caller.
    pending_join: Option<(u64, Reply<Result<(), CallError>>)>,
}

impl CallCoordinator {
    /// Start the actor. `signaling` is the event stream of the relay channel
    /// whose sink is `deps.signals`.
    pub fn spawn(
        config: SessionConfig,
        deps: SessionDeps,
        signaling: mpsc::UnboundedReceiver<SignalingEvent>,
    ) -> (CallHandle, JoinHandle<()>) {
        let bus = EventBus::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());

        let rooms = Arc::clone(&deps.rooms);
        let actor = Self {
            session: CallSession::new(config, deps, bus.clone(), peer_tx),
            rooms,
            state: state_tx,
            internal_tx,
            pending_join: None,
        };
        let task = tokio::spawn(actor.run(commands_rx, signaling, peer_rx, internal_rx));

        let handle = CallHandle {
            commands: commands_tx,
            state: state_rx,
            bus,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut signaling: mpsc::UnboundedReceiver<SignalingEvent>,
        mut peer_events: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!(user_id = %self.session.config().user_id, "call coordinator started");
        let mut signaling_open = true;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => {
                        debug!("all call handles dropped");
                        self.end_call().await;
                        self.publish();
                        break;
                    }
                },

                event = signaling.recv(), if signaling_open => match event {
                    Some(event) => self.session.handle_signaling(event).await,
                    None => {
                        debug!("signaling event stream ended");
                        signaling_open = false;
                    }
                },

                Some((generation, event)) = peer_events.recv() => {
                    self.session.handle_peer_event(generation, event).await;
                }

                Some(done) = internal.recv() => self.on_internal(done).await,
            }
            self.publish();
        }

        info!("call coordinator stopped");
    }

    /// Every reply is sent after the snapshot is published, so a caller that
    /// reads the snapshot right after an operation sees its effect.
    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::AcquireLocalMedia { constraints, reply } => {
                let result = self.session.acquire_local_media(constraints).await;
                self.reply(reply, result);
            }
            Command::CreateRoom { reply } => {
                let result = self.session.create_room().await;
                self.reply(reply, result);
            }
            Command::JoinRoom { room_id, reply } => match self.session.begin_join(&room_id) {
                Ok(generation) => {
                    self.pending_join = Some((generation, reply));
                    let rooms = Arc::clone(&self.rooms);
                    let done = self.internal_tx.clone();
                    tokio::spawn(async move {
                        let servers = rooms.ice_servers().await;
                        let _ = done.send(Internal::IceServersReady { generation, servers });
                    });
                }
                Err(e) => self.reply(reply, Err(e)),
            },
            Command::SendMessage { text, reply } => {
                let result = self.session.send_message(&text);
                self.reply(reply, result);
            }
            Command::ToggleMic { reply } => {
                let result = self.session.toggle_mic();
                self.reply(reply, result);
            }
            Command::ToggleCamera { reply } => {
                let result = self.session.toggle_camera();
                self.reply(reply, result);
            }
            Command::EndCall { reply } => {
                self.end_call().await;
                self.reply(reply, ());
            }
            Command::DismissError { reply } => {
                self.session.dismiss_error();
                self.reply(reply, ());
            }
        }
    }

    async fn on_internal(&mut self, done: Internal) {
        match done {
            Internal::IceServersReady { generation, servers } => {
                let Some((pending, reply)) = self.pending_join.take() else {
                    debug!(generation, "ice servers arrived with no join pending");
                    return;
                };
                if pending != generation {
                    self.pending_join = Some((pending, reply));
                    debug!(generation, pending, "ice servers for a superseded join");
                    return;
                }
                let result = self.session.complete_join(generation, servers).await;
                self.reply(reply, result);
            }
        }
    }

    async fn end_call(&mut self) {
        self.session.end_call().await;
        if let Some((_, reply)) = self.pending_join.take() {
            let _ = reply.send(Err(CallError::Ended));
        }
    }

    fn publish(&self) {
        self.state.send_replace(self.session.snapshot());
    }

    fn reply<T>(&self, reply: Reply<T>, value: T) {
        self.publish();
        // The caller may have given up waiting.
        let _ = reply.send(value);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::peer::PeerState;
    use crate::session::ConnectionPhase;
    use crate::signaling::protocol::{PeerPayload, SignalMessage};
    use crate::testing::{chat, offer, parts, FakeDevices, FakeRooms, COMPANION, ROOM};

    const WAIT: Duration = Duration::from_secs(5);

    fn spawn() -> (
        CallHandle,
        JoinHandle<()>,
        mpsc::UnboundedSender<SignalingEvent>,
        crate::testing::HarnessParts,
    ) {
        let p = parts(Some(COMPANION), FakeRooms::default(), FakeDevices { outcome: Ok(()) });
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (handle, task) = CallCoordinator::spawn(p.config.clone(), p.deps.clone(), sig_rx);
        (handle, task, sig_tx, p)
    }

    async fn wait_for(handle: &CallHandle, pred: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut rx = handle.watch();
        let snap = timeout(WAIT, rx.wait_for(|s| pred(s))).await.unwrap().unwrap();
        snap.clone()
    }

    #[tokio::test]
    async fn full_call_flow() {
        let (handle, task, sig_tx, p) = spawn();
        let mut events = handle.subscribe();

        assert_eq!(handle.acquire_local_media(MediaConstraints::default()).await.unwrap(), 2);
        let room = handle.create_room().await.unwrap();
        assert_eq!(room, ROOM);
        handle.join_room(room.clone()).await.unwrap();

        // Tutor answers our offer after announcing itself.
        sig_tx
            .send(SignalingEvent::Message(SignalMessage::PeerJoined(PeerPayload {
                room_id: ROOM.into(),
                user_id: "tutor".into(),
            })))
            .unwrap();
        sig_tx.send(SignalingEvent::Message(chat(ROOM, "Hello! What shall we study?"))).unwrap();

        let snap = wait_for(&handle, |s| s.transcript_len == 1).await;
        assert!(snap.joined);
        assert_eq!(snap.phase, ConnectionPhase::Connecting);
        assert!(p.peers.log().contains(&"offer".to_string()));

        p.peers.post(PeerEvent::StateChanged(PeerState::Connected));
        wait_for(&handle, |s| s.phase == ConnectionPhase::Connected).await;

        assert!(handle.send_message("Can we do math?").await.unwrap());
        assert_eq!(handle.toggle_mic().await, Some(false));

        handle.end_call().await;
        let snap = handle.snapshot();
        assert_eq!(snap.phase, ConnectionPhase::Idle);
        assert_eq!(snap.room_id, None);
        assert_eq!(snap.mic_enabled, None);
        assert_eq!(p.rooms.deleted(), vec![ROOM.to_string()]);

        let mut names = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            names.push(envelope.event.name());
        }
        assert!(names.contains(&"room.joined"));
        assert!(names.contains(&"transcript.appended"));
        assert_eq!(names.last(), Some(&"call.ended"));

        drop(handle);
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropping_the_handle_ends_the_call() {
        let (handle, task, _sig_tx, p) = spawn();
        handle.acquire_local_media(MediaConstraints::default()).await.unwrap();
        let room = handle.create_room().await.unwrap();
        handle.join_room(room).await.unwrap();

        drop(handle);
        timeout(WAIT, task).await.unwrap().unwrap();

        assert!(p.peers.log().contains(&"close".to_string()));
        assert_eq!(p.rooms.deleted(), vec![ROOM.to_string()]);
    }

    #[tokio::test]
    async fn early_offer_is_answered_after_join() {
        let rooms = FakeRooms {
            ice_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let p = parts(Some(COMPANION), rooms, FakeDevices { outcome: Ok(()) });
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (handle, _task) = CallCoordinator::spawn(p.config.clone(), p.deps.clone(), sig_rx);
        let room = handle.create_room().await.unwrap();

        let join = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.join_room(room).await })
        };
        // Room claimed, link not created yet: the ICE fetch is still running.
        wait_for(&handle, |s| s.joined).await;
        sig_tx.send(SignalingEvent::Message(offer(ROOM, "tutor"))).unwrap();

        join.await.unwrap().unwrap();

        let sent = p.signals.sent();
        assert!(matches!(sent[0], SignalMessage::Join(_)));
        assert!(matches!(sent[1], SignalMessage::Answer(_)));
        assert!(handle.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn second_join_is_rejected_through_handle() {
        let (handle, _task, _sig_tx, _p) = spawn();
        handle.join_room(ROOM).await.unwrap();
        let err = handle.join_room("room-2").await.unwrap_err();
        assert!(matches!(err, CallError::AlreadyInRoom(_)));
        assert_eq!(handle.snapshot().error.unwrap().message, "Already in a call");

        handle.dismiss_error().await;
        assert!(handle.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn failed_join_can_be_retried() {
        let (handle, _task, _sig_tx, p) = spawn();
        let room = handle.create_room().await.unwrap();

        p.peers.set_failing(true);
        let err = handle.join_room(room.clone()).await.unwrap_err();
        assert!(matches!(err, CallError::Negotiation { .. }));
        let snap = handle.snapshot();
        assert!(!snap.joined);
        assert_eq!(snap.phase, ConnectionPhase::Idle);

        p.peers.set_failing(false);
        handle.join_room(room).await.unwrap();
        assert!(handle.snapshot().joined);
        assert!(p.signals.sent().iter().any(|m| matches!(m, SignalMessage::Join(_))));
    }

    #[tokio::test]
    async fn operations_after_stop_report_ended() {
        let (handle, task, _sig_tx, _p) = spawn();
        task.abort();
        let _ = task.await;

        assert!(matches!(handle.create_room().await, Err(CallError::Ended)));
        assert_eq!(handle.toggle_camera().await, None);
        handle.end_call().await;
    }
}
