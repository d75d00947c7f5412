use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use duels_protocol::events::ErrorCode;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failure of the shared backing store itself (unreachable, timed out).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Transient,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("request is invalid: {0}")]
    InvalidRequest(&'static str),
    #[error("user is offline")]
    UserOffline,
    #[error("no pending invitation")]
    InviteNotFound,
    #[error("an invitation is already outstanding")]
    InviteExists,
    #[error("inviter is no longer online")]
    InviterUnavailable,
    #[error("session not found")]
    SessionNotFound,
    #[error("player is not in a game")]
    NotInGame,
    #[error("player is not a participant of the session")]
    NotParticipant,
    #[error("session already completed")]
    SessionCompleted,
    #[error("player is already in a game")]
    AlreadyInGame,
    #[error("no problem matches the requested filters")]
    NoProblemAvailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::UserOffline
            | Self::InviteNotFound
            | Self::InviterUnavailable
            | Self::SessionNotFound
            | Self::NotInGame
            | Self::NoProblemAvailable => ErrorKind::NotFound,
            Self::InviteExists
            | Self::NotParticipant
            | Self::SessionCompleted
            | Self::AlreadyInGame => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Transient,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::UserOffline => ErrorCode::UserOffline,
            Self::InviteNotFound => ErrorCode::InviteNotFound,
            Self::InviteExists => ErrorCode::InviteExists,
            Self::InviterUnavailable => ErrorCode::InviterUnavailable,
            Self::SessionNotFound | Self::NotInGame => ErrorCode::NotInGame,
            Self::NotParticipant => ErrorCode::NotParticipant,
            Self::SessionCompleted => ErrorCode::SessionCompleted,
            Self::AlreadyInGame => ErrorCode::AlreadyInGame,
            Self::NoProblemAvailable => ErrorCode::NoProblemAvailable,
            Self::Store(_) => ErrorCode::ServerError,
        }
    }

    /// Text safe to put on the wire. Store failures never leak their detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,
    #[error("invalid bearer credential")]
    InvalidCredential,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TicketError {
    #[error("ticket is unknown or already used")]
    Unknown,
    #[error("ticket has expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Errors returned by the plain HTTP endpoints.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl From<TicketError> for ApiError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::Store(inner) => Self::Internal(inner.to_string()),
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "UNAUTHORIZED",
                    message,
                },
            ),
            ApiError::Internal(detail) => {
                error!(detail = %detail, "http.internal_error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
