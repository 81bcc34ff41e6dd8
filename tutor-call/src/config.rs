use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::media::{MediaConstraints, VideoConstraints};
use crate::session::SessionConfig;
use crate::signaling::ReconnectPolicy;

/// Call client configuration. Every field can be set through
/// `TUTOR_CALL__<FIELD>` (e.g. `TUTOR_CALL__API_URL`) or a `.env` file.
#[derive(Debug, Deserialize, Clone)]
pub struct CallConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub companion_id: Option<String>,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_fallback_stun_url")]
    pub fallback_stun_url: String,
    #[serde(default = "default_video_width")]
    pub video_width: u32,
    #[serde(default = "default_video_height")]
    pub video_height: u32,
    #[serde(default = "default_true")]
    pub audio_enabled: bool,
    #[serde(default = "default_true")]
    pub video_enabled: bool,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

fn default_api_url() -> String { "http://localhost:8000".into() }
fn default_signaling_url() -> String { "ws://localhost:8000/ws".into() }
fn default_user_id() -> String { format!("student-{}", &uuid::Uuid::new_v4().to_string()[..8]) }
fn default_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_delay_ms() -> u64 { 1000 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_fallback_stun_url() -> String { tutor_shared::types::DEFAULT_STUN_URL.into() }
fn default_video_width() -> u32 { 1280 }
fn default_video_height() -> u32 { 720 }
fn default_true() -> bool { true }
fn default_history_limit() -> u32 { 5 }

impl CallConfig {
    /// Load from the environment, reading `.env` first when present.
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_source(config::Environment::with_prefix("TUTOR_CALL").separator("__"))
    }

    fn from_source(source: config::Environment) -> anyhow::Result<Self> {
        let config = config::Config::builder().add_source(source).build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            user_id: self.user_id.clone(),
            companion_id: self.companion_id.clone().filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.audio_enabled,
            video: self.video_enabled.then_some(VideoConstraints {
                width: self.video_width,
                height: self.video_height,
            }),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn log_summary(&self) {
        info!("──── Tutor Call Configuration ────");
        info!("  api_url            : {}", self.api_url);
        info!("  signaling_url      : {}", self.signaling_url);
        info!("  user_id            : {}", self.user_id);
        info!(
            "  companion_id       : {}",
            self.companion_id.as_deref().unwrap_or("(not set)")
        );
        info!(
            "  reconnect          : {} attempts, {} ms apart",
            self.reconnect_attempts, self.reconnect_delay_ms
        );
        info!("  request_timeout    : {}s", self.request_timeout_secs);
        info!("  fallback_stun_url  : {}", self.fallback_stun_url);
        info!(
            "  capture            : audio={} video={} ({}x{})",
            self.audio_enabled, self.video_enabled, self.video_width, self.video_height
        );
        info!("─────────────────────────────────");
    }
}
