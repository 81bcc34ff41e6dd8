use serde::{Deserialize, Serialize};

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Media device errors
/// - E2xxx: Room lifecycle errors
/// - E3xxx: Signaling errors
/// - E4xxx: Negotiation errors
/// - E5xxx: Session misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    BadRequest,
    ServiceUnavailable,
    Timeout,

    // Media (E1xxx)
    MediaAccessDenied,
    MediaUnavailable,

    // Rooms (E2xxx)
    CompanionRequired,
    RoomCreationFailed,
    RoomNotFound,

    // Signaling (E3xxx)
    SignalingUnavailable,
    SignalingClosed,
    RelayRejected,

    // Negotiation (E4xxx)
    InvalidSessionDescription,
    InvalidCandidate,
    NegotiationFailed,

    // Session (E5xxx)
    AlreadyInRoom,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::BadRequest => "E0004",
            Self::ServiceUnavailable => "E0005",
            Self::Timeout => "E0006",

            // Media
            Self::MediaAccessDenied => "E1001",
            Self::MediaUnavailable => "E1002",

            // Rooms
            Self::CompanionRequired => "E2001",
            Self::RoomCreationFailed => "E2002",
            Self::RoomNotFound => "E2003",

            // Signaling
            Self::SignalingUnavailable => "E3001",
            Self::SignalingClosed => "E3002",
            Self::RelayRejected => "E3003",

            // Negotiation
            Self::InvalidSessionDescription => "E4001",
            Self::InvalidCandidate => "E4002",
            Self::NegotiationFailed => "E4003",

            // Session
            Self::AlreadyInRoom => "E5001",
        }
    }

    /// Classify an HTTP status returned by the backend.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::BadRequest,
            404 => Self::NotFound,
            408 | 504 => Self::Timeout,
            502 | 503 => Self::ServiceUnavailable,
            _ => Self::InternalError,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
    },

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Known { code, .. } => *code,
            Self::Status { status, .. } => ErrorCode::from_status(*status),
            Self::Http(err) if err.is_timeout() => ErrorCode::Timeout,
            Self::Http(err) if err.is_connect() => ErrorCode::ServiceUnavailable,
            Self::Http(_) => ErrorCode::InternalError,
            Self::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// `true` when the backend could not be reached at all, as opposed to
    /// answering with an error.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Http(err) if err.is_connect() || err.is_timeout())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_area() {
        assert_eq!(ErrorCode::MediaAccessDenied.code(), "E1001");
        assert_eq!(ErrorCode::RoomCreationFailed.code(), "E2002");
        assert_eq!(ErrorCode::SignalingClosed.code(), "E3002");
        assert_eq!(ErrorCode::InvalidCandidate.code(), "E4002");
        assert_eq!(ErrorCode::AlreadyInRoom.to_string(), "E5001");
    }

    #[test]
    fn status_classification() {
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(422), ErrorCode::BadRequest);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::ServiceUnavailable);
        assert_eq!(ErrorCode::from_status(500), ErrorCode::InternalError);

        let err = AppError::Status { status: 404, message: "Room not found".into() };
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(!err.is_unreachable());
    }

    #[test]
    fn known_error_keeps_its_code() {
        let err = AppError::new(ErrorCode::RoomNotFound, "Room not found");
        assert_eq!(err.code(), ErrorCode::RoomNotFound);
        assert_eq!(err.to_string(), "Room not found");
    }

    #[test]
    fn validation_message() {
        let err = AppError::Validation("companion_id must not be empty".into());
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert_eq!(err.to_string(), "validation error: companion_id must not be empty");
    }
}
