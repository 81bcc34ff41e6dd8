use tutor_shared::{AppError, ErrorCode};

// ─── Media ──────────────────────────────────────────────────────────────────

/// Failure to obtain local capture devices. Kept apart from network errors so
/// the view can tell "permission denied" from "backend down".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaAccessError {
    #[error("permission to use the {0} was denied")]
    Denied(&'static str),

    #[error("no {0} is available")]
    Unavailable(&'static str),
}

// ─── CallError ──────────────────────────────────────────────────────────────

/// Every failure the call coordinator can report.
///
/// All of them reduce to one banner message through [`CallError::user_message`];
/// none is retried automatically.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("media access failed: {0}")]
    MediaAccess(#[from] MediaAccessError),

    #[error("room creation failed: {message}")]
    RoomCreation { code: ErrorCode, message: String },

    #[error("signaling failed: {message}")]
    Signaling { code: ErrorCode, message: String },

    #[error("negotiation failed: {message}")]
    Negotiation { code: ErrorCode, message: String },

    #[error("already in room '{0}'")]
    AlreadyInRoom(String),

    /// The call ended (or the coordinator stopped) before the operation
    /// could complete.
    #[error("call ended before the operation completed")]
    Ended,
}

impl CallError {
    // ─── Constructors ───────────────────────────────────────────────────

    pub fn companion_required() -> Self {
        Self::RoomCreation {
            code: ErrorCode::CompanionRequired,
            message: "a companion id is required to create a room".into(),
        }
    }

    pub fn room_creation(err: &AppError) -> Self {
        Self::RoomCreation {
            code: ErrorCode::RoomCreationFailed,
            message: err.to_string(),
        }
    }

    pub fn signaling_closed() -> Self {
        Self::Signaling {
            code: ErrorCode::SignalingClosed,
            message: "signaling channel is closed".into(),
        }
    }

    pub fn signaling_unavailable(reason: impl Into<String>) -> Self {
        Self::Signaling {
            code: ErrorCode::SignalingUnavailable,
            message: reason.into(),
        }
    }

    pub fn relay_rejected(reason: impl Into<String>) -> Self {
        Self::Signaling {
            code: ErrorCode::RelayRejected,
            message: reason.into(),
        }
    }

    pub fn invalid_description(reason: impl Into<String>) -> Self {
        Self::Negotiation {
            code: ErrorCode::InvalidSessionDescription,
            message: reason.into(),
        }
    }

    pub fn invalid_candidate(reason: impl Into<String>) -> Self {
        Self::Negotiation {
            code: ErrorCode::InvalidCandidate,
            message: reason.into(),
        }
    }

    pub fn negotiation(reason: impl Into<String>) -> Self {
        Self::Negotiation {
            code: ErrorCode::NegotiationFailed,
            message: reason.into(),
        }
    }

    // ─── Classification ─────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MediaAccess(MediaAccessError::Denied(_)) => ErrorCode::MediaAccessDenied,
            Self::MediaAccess(MediaAccessError::Unavailable(_)) => ErrorCode::MediaUnavailable,
            Self::RoomCreation { code, .. }
            | Self::Signaling { code, .. }
            | Self::Negotiation { code, .. } => *code,
            Self::AlreadyInRoom(_) => ErrorCode::AlreadyInRoom,
            Self::Ended => ErrorCode::InternalError,
        }
    }

    /// Text shown in the dismissible error banner.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::MediaAccess(_) => "Failed to access camera/microphone",
            Self::RoomCreation { code: ErrorCode::CompanionRequired, .. } => "Please choose a tutor first",
            Self::RoomCreation { .. } => "Failed to create room",
            Self::Signaling { .. } => "Connection error",
            Self::Negotiation { .. } => "Failed to set up the call",
            Self::AlreadyInRoom(_) => "Already in a call",
            Self::Ended => "The call has ended",
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
