//! Application error types
//!
//! Top-level errors surfaced by the binary: bootstrap failures and anything a
//! library layer could not recover from.

use std::fmt;

use crate::config::ConfigError;
use crate::telemetry::TracingError;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Bootstrap errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TracingError),

    // Upstream errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Authentication rejected: {0}")]
    Unauthorized(String),

    // Internal errors
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    /// Get error code for logs
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Telemetry(_) => "TELEMETRY_ERROR",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit code for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Unauthorized(_) => 2,
            _ => 1,
        }
    }

    /// Create a gateway error
    #[must_use]
    pub fn gateway(msg: impl fmt::Display) -> Self {
        Self::Gateway(msg.to_string())
    }

    /// Create an internal error from any error
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
