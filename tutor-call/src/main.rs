// Terminal session view for the AI video tutor call.
//
// Starts a call with the configured tutor and turns stdin into call
// controls. Transcript lines, phase changes, errors and study suggestions
// are printed to stdout; logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use tutor_call::config::CallConfig;
use tutor_call::events::{CallEvent, CallEventEnvelope};
use tutor_call::media::SampleTrackDevices;
use tutor_call::peer::RtcPeerFactory;
use tutor_call::signaling::{ChannelStatus, SignalingChannel};
use tutor_call::{CallCoordinator, CallHandle, ConnectionPhase, SessionDeps, SessionSnapshot};
use tutor_shared::clients::backend::BackendClient;
use tutor_shared::telemetry::init_tracing;
use tutor_shared::types::PaginationParams;

// ─── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // DTLS and HTTPS share one rustls provider; a second install is harmless.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cfg = CallConfig::load().context("invalid TUTOR_CALL configuration")?;
    init_tracing("tutor-call");
    cfg.log_summary();

    let backend = BackendClient::new(&cfg.api_url, cfg.request_timeout())?
        .with_fallback_stun(cfg.fallback_stun_url.clone());

    let session = cfg.session();
    if session.companion_id.is_none() {
        print_directory(&backend).await;
        return Ok(());
    }

    let (channel, signaling_events) = SignalingChannel::connect(cfg.signaling_url.clone(), cfg.reconnect_policy());
    let deps = SessionDeps {
        media: Arc::new(SampleTrackDevices {
            has_audio: cfg.audio_enabled,
            has_video: cfg.video_enabled,
        }),
        peers: Arc::new(RtcPeerFactory),
        rooms: Arc::new(backend.clone()),
        signals: Arc::new(channel.clone()),
    };
    let (handle, coordinator) = CallCoordinator::spawn(session, deps, signaling_events);
    let renderer = tokio::spawn(render(handle.subscribe()));

    if start_call(&handle, &cfg).await {
        println!("Type a message and press Enter. Commands: /mic /cam /status /dismiss /end");
        read_input(&handle).await;
    }

    handle.end_call().await;
    drop(handle);
    if let Err(e) = coordinator.await {
        warn!(error = %e, "coordinator task failed");
    }
    channel.close();
    let _ = tokio::time::timeout(Duration::from_secs(1), renderer).await;

    print_history(&backend, &cfg).await;
    info!("session view closed");
    Ok(())
}

// ─── Call setup ─────────────────────────────────────────────────────────────

/// Media, room, join. Failures are already on screen through the error
/// event; `false` means the call could not start.
async fn start_call(handle: &CallHandle, cfg: &CallConfig) -> bool {
    if let Err(e) = handle.acquire_local_media(cfg.media_constraints()).await {
        warn!(error = %e, "local media unavailable");
        return false;
    }
    let room_id = match handle.create_room().await {
        Ok(room_id) => room_id,
        Err(e) => {
            warn!(error = %e, "room creation failed");
            return false;
        }
    };
    if let Err(e) = handle.join_room(room_id).await {
        warn!(error = %e, "join failed");
        return false;
    }
    true
}

async fn read_input(handle: &CallHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            },
        };

        match line.trim() {
            "/end" => break,
            "/mic" => match handle.toggle_mic().await {
                Some(on) => println!("microphone {}", if on { "on" } else { "muted" }),
                None => println!("no microphone"),
            },
            "/cam" => match handle.toggle_camera().await {
                Some(on) => println!("camera {}", if on { "on" } else { "off" }),
                None => println!("no camera"),
            },
            "/dismiss" => handle.dismiss_error().await,
            "/status" => print_status(&handle.snapshot()),
            _ => {
                if let Err(e) = handle.send_message(line.as_str()).await {
                    warn!(error = %e, "message not sent");
                }
            }
        }
    }
}

// ─── Rendering ──────────────────────────────────────────────────────────────

async fn render(mut events: broadcast::Receiver<CallEventEnvelope>) {
    loop {
        let envelope = match events.recv().await {
            Ok(envelope) => envelope,
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "view fell behind call events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match envelope.event {
            CallEvent::PhaseChanged(phase) => match phase {
                ConnectionPhase::Connecting => println!("* connecting..."),
                ConnectionPhase::Connected => println!("* connected"),
                ConnectionPhase::Disconnected => println!("* connection lost; type /end to leave"),
                ConnectionPhase::Idle => {}
            },
            CallEvent::RoomCreated { room_id } => println!("* room {room_id} created"),
            CallEvent::PeerJoined { user_id } => println!("* {user_id} joined"),
            CallEvent::PeerLeft { user_id } => println!("* {user_id} left"),
            CallEvent::RemoteTrack { kind, .. } => println!("* receiving tutor {kind}"),
            CallEvent::TranscriptAppended(entry) => {
                let who = match entry.sender {
                    tutor_call::signaling::Sender::User => "you",
                    tutor_call::signaling::Sender::Ai => "tutor",
                };
                let mut line = format!("[{}] {who}: {}", entry.timestamp.format("%H:%M:%S"), entry.text);
                if let Some(audio) = &entry.audio_url {
                    line.push_str(&format!(" [audio: {audio}]"));
                }
                if let Some(video) = &entry.video_url {
                    line.push_str(&format!(" [video: {video}]"));
                }
                println!("{line}");
            }
            CallEvent::Suggestions(suggestions) => {
                println!("* suggested next steps:");
                for s in suggestions {
                    println!("    - {}: {}", s.title, s.description);
                }
            }
            CallEvent::SignalingStatus(ChannelStatus::Reconnecting { attempt }) => {
                println!("* signaling lost, reconnecting (attempt {attempt})");
            }
            CallEvent::Error { code, message } => println!("! {message} ({code}); /dismiss to clear"),
            CallEvent::CallEnded { .. } => println!("* call ended"),
            _ => {}
        }
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    let flag = |v: Option<bool>| match v {
        Some(true) => "on",
        Some(false) => "off",
        None => "none",
    };
    println!("phase      : {}", snapshot.phase);
    println!("room       : {}", snapshot.room_id.as_deref().unwrap_or("-"));
    println!("mic/camera : {}/{}", flag(snapshot.mic_enabled), flag(snapshot.camera_enabled));
    println!("messages   : {}", snapshot.transcript_len);
    if let Some(since) = snapshot.connected_since {
        let secs = (Utc::now() - since).num_seconds().max(0);
        println!("duration   : {:02}:{:02}", secs / 60, secs % 60);
    }
    if let Some(err) = &snapshot.error {
        println!("error      : {} ({})", err.message, err.code);
    }
}

async fn print_directory(backend: &BackendClient) {
    match backend.companions().await {
        Ok(companions) => {
            println!("No tutor selected. Set TUTOR_CALL__COMPANION_ID to one of:");
            for c in companions {
                println!("  {:<12} {} ({})", c.id, c.name, c.tags.join(", "));
            }
        }
        Err(e) => println!("No tutor selected and the directory is unavailable: {e}"),
    }
}

async fn print_history(backend: &BackendClient, cfg: &CallConfig) {
    let page = PaginationParams::new(cfg.history_limit, 0);
    match backend.session_history(&cfg.user_id, page).await {
        Ok(history) if history.sessions.is_empty() => {}
        Ok(history) => {
            println!("Recent sessions ({} total):", history.total);
            for s in &history.sessions {
                println!(
                    "  {}  {:<16} {:>3} messages  {}",
                    s.duration_label(),
                    s.companion.name,
                    s.message_count,
                    s.transcript_preview
                );
            }
            if let Some(latest) = history.sessions.first() {
                print_transcript(backend, &cfg.user_id, &latest.session_id).await;
            }
        }
        Err(e) => warn!(error = %e, "session history unavailable"),
    }
}

async fn print_transcript(backend: &BackendClient, user_id: &str, session_id: &str) {
    let transcript = match backend.session_transcript(user_id, session_id).await {
        Ok(transcript) => transcript,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "session transcript unavailable");
            return;
        }
    };
    println!("Latest session transcript:");
    for m in &transcript.messages {
        println!("  {:<9} {}", m.role, m.content);
    }
}
