//! Gateway error types

use crate::codec::FrameError;
use crate::http::HttpError;
use crate::protocol::{CloseAction, CloseCode};
use crate::transport::TransportError;

/// Errors ending a gateway connection
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("session invalidated (resumable: {resumable})")]
    SessionInvalidated { resumable: bool },

    #[error("heartbeat was not acknowledged")]
    HeartbeatTimeout,

    #[error("gateway requested a reconnect")]
    ReconnectRequested,

    #[error("connection closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("http error: {0}")]
    Http(#[from] HttpError),

    #[error("shard {0} is not running")]
    ShardUnavailable(u32),
}

/// What a shard does after a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Reconnect and RESUME the stored session
    Resume,
    /// Reconnect right away and RESUME
    ResumeNow,
    /// Drop the session and IDENTIFY again
    Reidentify,
    /// Session discarded by the gateway: wait the mandatory jitter, then IDENTIFY
    InvalidatedReidentify,
    /// Stop the shard
    Fatal,
}

impl GatewayError {
    /// Map a protocol error to a close decision
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Frame(FrameError::UnexpectedClose { code, .. }) | Self::Closed { code, .. } => {
                match CloseAction::for_code(*code) {
                    CloseAction::Resume => Recovery::Resume,
                    CloseAction::Reidentify => Recovery::Reidentify,
                    CloseAction::Fatal => Recovery::Fatal,
                }
            }
            Self::Frame(_)
            | Self::Transport(_)
            | Self::HeartbeatTimeout
            | Self::Http(_)
            | Self::ShardUnavailable(_) => Recovery::Resume,
            Self::ReconnectRequested | Self::SessionInvalidated { resumable: true } => {
                Recovery::ResumeNow
            }
            Self::SessionInvalidated { resumable: false } => Recovery::InvalidatedReidentify,
            Self::ProtocolViolation(_) => Recovery::Reidentify,
        }
    }

    /// Close code carried by the error, if the gateway closed the connection
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Frame(FrameError::UnexpectedClose { code, .. }) | Self::Closed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// Human readable reason, preferring the documented close code meaning
    pub fn reason(&self) -> String {
        match self {
            Self::Frame(FrameError::UnexpectedClose { code, reason })
            | Self::Closed { code, reason } => match CloseCode::from_u16(*code) {
                Some(known) if reason.is_empty() => known.description().to_string(),
                _ => reason.clone(),
            },
            other => other.to_string(),
        }
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
