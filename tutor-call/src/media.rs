use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::MediaAccessError;

// ─── Constraints ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// What to capture. `video: None` means audio only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }
}

// ─── Local tracks ───────────────────────────────────────────────────────────

/// One captured track. `enabled` mutes without releasing the device;
/// `stop` releases it for good.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtc: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: format!("{}-{}", kind, uuid::Uuid::new_v4()),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtc: None,
        }
    }

    /// Attach the sample track that carries this capture on a peer link.
    pub fn with_rtc(mut self, track: Arc<TrackLocalStaticSample>) -> Self {
        self.rtc = Some(track);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn rtc(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        self.rtc.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip `enabled` and return the new value. A stopped track stays
    /// disabled.
    pub fn toggle(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Release the track. Returns `true` only for the call that stopped it.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if first {
            self.enabled.store(false, Ordering::SeqCst);
            tracing::debug!(track_id = %self.id, kind = %self.kind, "local track stopped");
        }
        first
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// The set of tracks obtained by one `acquire` call.
#[derive(Debug, Default)]
pub struct LocalMedia {
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            tracks: tracks.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn first(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn audio_track(&self) -> Option<&Arc<LocalTrack>> {
        self.first(TrackKind::Audio)
    }

    pub fn video_track(&self) -> Option<&Arc<LocalTrack>> {
        self.first(TrackKind::Video)
    }

    /// Toggle the first track of `kind`. `None` when there is no such track.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        self.first(kind).map(|t| t.toggle())
    }

    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

// ─── Capability ─────────────────────────────────────────────────────────────

/// Source of local capture tracks.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaAccessError>;
}

/// Device-less capture: builds Opus and VP8 sample tracks that an encoder
/// can write into. Missing capabilities are reported as `Unavailable`.
#[derive(Debug, Clone, Copy)]
pub struct SampleTrackDevices {
    pub has_audio: bool,
    pub has_video: bool,
}

impl Default for SampleTrackDevices {
    fn default() -> Self {
        Self { has_audio: true, has_video: true }
    }
}

#[async_trait]
impl MediaDevices for SampleTrackDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaAccessError> {
        let stream_id = format!("tutor-call-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();

        if constraints.audio {
            if !self.has_audio {
                return Err(MediaAccessError::Unavailable("microphone"));
            }
            let track = LocalTrack::new(TrackKind::Audio);
            let rtc = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                track.id().to_string(),
                stream_id.clone(),
            ));
            tracks.push(track.with_rtc(rtc));
        }

        if let Some(video) = constraints.video {
            if !self.has_video {
                return Err(MediaAccessError::Unavailable("camera"));
            }
            let track = LocalTrack::new(TrackKind::Video);
            let rtc = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                track.id().to_string(),
                stream_id.clone(),
            ));
            tracing::debug!(width = video.width, height = video.height, "video capture configured");
            tracks.push(track.with_rtc(rtc));
        }

        tracing::info!(tracks = tracks.len(), "local media acquired");
        Ok(LocalMedia::new(tracks))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
