//! Error types for the Turnstile service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// The first four variants are request rejections produced by the
/// middleware hooks; the rest are startup or transport failures.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Too many requests in the current window
    #[error("Rate limit exceeded, retry in {}s", retry_after.as_secs())]
    RateLimitExceeded { retry_after: Duration },

    /// Session idle for longer than the configured timeout, or never established
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// Unsafe request without a CSRF token
    #[error("CSRF token missing")]
    CsrfTokenMissing,

    /// Unsafe request whose CSRF token is unknown, expired or mismatched
    #[error("CSRF token invalid or expired")]
    CsrfTokenInvalid,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Stable machine-readable code for rejections, `None` for internal failures.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            TurnstileError::RateLimitExceeded { .. } => Some("RATE_LIMIT_EXCEEDED"),
            TurnstileError::SessionExpired => Some("SESSION_EXPIRED"),
            TurnstileError::CsrfTokenMissing => Some("CSRF_TOKEN_MISSING"),
            TurnstileError::CsrfTokenInvalid => Some("CSRF_TOKEN_INVALID"),
            _ => None,
        }
    }

    /// Whether this error is a request rejection rather than a failure.
    pub fn is_rejection(&self) -> bool {
        self.code().is_some()
    }

    /// How long the caller should wait before retrying, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TurnstileError::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
