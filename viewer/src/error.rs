//! Error types for the viewer library.

use std::time::Duration;

use events::{CodecError, ErrorCode};

/// Failure talking to the relay, over HTTP or the event channel.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request ({status} {code}): {message}")]
    Rejected { status: u16, code: String, message: String },
    #[error("websocket failed: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("event decode failed: {0}")]
    Decode(#[from] CodecError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected first event `{0}`; expected `connected`")]
    Handshake(&'static str),
    #[error("channel closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(err))
    }
}

impl ClientError {
    /// The server's error code when it rejected the request.
    #[must_use]
    pub fn rejection_code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl ErrorCode for ClientError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl(_) => "E_INVALID_BASE_URL",
            Self::Http(_) | Self::Ws(_) => "E_TRANSPORT",
            Self::Rejected { .. } => "E_REJECTED",
            Self::Decode(_) => "E_BAD_EVENT",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::Handshake(_) => "E_HANDSHAKE",
            Self::Closed => "E_CHANNEL_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Ws(_) | Self::Timeout(_) | Self::Closed => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::InvalidBaseUrl(_) | Self::Decode(_) | Self::Handshake(_) => false,
        }
    }
}

/// Failure of a locally initiated action on a reconciler.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("another {0} is still in flight")]
    Busy(&'static str),
    #[error("comment body is empty")]
    EmptyComment,
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] ClientError),
}

impl ErrorCode for ReconcileError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Busy(_) => "E_BUSY",
            Self::EmptyComment => "E_EMPTY_COMMENT",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::Store(err) => err.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Busy(_) | Self::Timeout(_) => true,
            Self::EmptyComment => false,
            Self::Store(err) => err.retryable(),
        }
    }
}
