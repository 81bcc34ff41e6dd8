use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::errors::{AppError, AppResult, ErrorCode};
use crate::types::{
    ApiErrorBody, Companion, CreateRoomRequest, CreateRoomResponse, IceServer, PaginationParams,
    SessionHistory, SessionTranscript, WebRtcConfig, DEFAULT_STUN_URL,
};

/// HTTP client for the tutor backend (rooms, ICE configuration, directory
/// and session history).
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    fallback_ice: Vec<IceServer>,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            fallback_ice: vec![IceServer::stun(DEFAULT_STUN_URL)],
        })
    }

    /// Replace the STUN server used when `/webrtc/config` is unreachable.
    pub fn with_fallback_stun(mut self, url: impl Into<String>) -> Self {
        self.fallback_ice = vec![IceServer::stun(url)];
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---------------------------------------------------------------------------
    // Rooms
    // ---------------------------------------------------------------------------

    pub async fn create_room(&self, user_id: &str, companion_id: &str) -> AppResult<CreateRoomResponse> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation("user_id must not be empty".into()));
        }
        if companion_id.trim().is_empty() {
            return Err(AppError::Validation("companion_id must not be empty".into()));
        }

        let url = format!("{}/api/video/rooms", self.base_url);
        let res = self
            .http
            .post(&url)
            .json(&CreateRoomRequest {
                user_id: user_id.to_string(),
                companion_id: companion_id.to_string(),
            })
            .send()
            .await?;

        let created: CreateRoomResponse = decode(res).await?;
        tracing::info!(room_id = %created.room_id, companion_id = %companion_id, "room created");
        Ok(created)
    }

    pub async fn delete_room(&self, room_id: &str) -> AppResult<()> {
        let url = format!("{}/api/video/rooms/{}", self.base_url, segment(room_id)?);
        let res = self.http.delete(&url).send().await?;
        if res.status().is_success() {
            tracing::info!(room_id = %room_id, "room deleted");
            return Ok(());
        }
        match status_error(res).await {
            AppError::Status { status: 404, message } => Err(AppError::new(ErrorCode::RoomNotFound, message)),
            other => Err(other),
        }
    }

    // ---------------------------------------------------------------------------
    // ICE configuration
    // ---------------------------------------------------------------------------

    pub async fn webrtc_config(&self) -> AppResult<WebRtcConfig> {
        let url = format!("{}/api/video/webrtc/config", self.base_url);
        let res = self.http.get(&url).send().await?;
        decode(res).await
    }

    /// ICE servers for a new peer link. Never fails: any backend error falls
    /// back to the public STUN default.
    pub async fn ice_servers(&self) -> Vec<IceServer> {
        match self.webrtc_config().await {
            Ok(cfg) if !cfg.ice_servers.is_empty() => cfg.ice_servers,
            Ok(_) => {
                tracing::warn!("backend returned no ICE servers, using fallback");
                self.fallback_ice.clone()
            }
            Err(e) if e.is_unreachable() => {
                tracing::warn!(error = %e, "backend unreachable, using fallback ICE servers");
                self.fallback_ice.clone()
            }
            Err(e) => {
                tracing::error!(code = %e.code(), error = %e, "ICE configuration request failed, using fallback");
                self.fallback_ice.clone()
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Directory and history
    // ---------------------------------------------------------------------------

    pub async fn companions(&self) -> AppResult<Vec<Companion>> {
        let url = format!("{}/api/companions", self.base_url);
        let res = self.http.get(&url).send().await?;
        decode(res).await
    }

    pub async fn session_history(&self, user_id: &str, page: PaginationParams) -> AppResult<SessionHistory> {
        let url = format!("{}/api/video/sessions/{}", self.base_url, segment(user_id)?);
        let res = self
            .http
            .get(&url)
            .query(&[("limit", page.limit), ("offset", page.offset)])
            .send()
            .await?;
        decode(res).await
    }

    pub async fn session_transcript(&self, user_id: &str, session_id: &str) -> AppResult<SessionTranscript> {
        let url = format!(
            "{}/api/video/sessions/{}/{}/transcript",
            self.base_url,
            segment(user_id)?,
            segment(session_id)?
        );
        let res = self.http.get(&url).send().await?;
        decode(res).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Identifiers are interpolated into paths verbatim, so reject anything that
/// would change the route.
fn segment(id: &str) -> AppResult<&str> {
    if id.is_empty() || id.contains(['/', '?', '#']) {
        return Err(AppError::Validation(format!("invalid identifier '{id}'")));
    }
    Ok(id)
}

async fn decode<T: DeserializeOwned>(res: Response) -> AppResult<T> {
    if res.status().is_success() {
        return Ok(res.json::<T>().await?);
    }
    Err(status_error(res).await)
}

async fn status_error(res: Response) -> AppError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.message())
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });
    tracing::warn!(status = %status, message = %message, "backend request failed");
    AppError::Status {
        status: status.as_u16(),
        message,
    }
}
