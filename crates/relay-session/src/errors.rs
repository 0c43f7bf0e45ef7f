//! Relay session error types.
//!
//! Error types map to the `error` kind strings returned across the signaling
//! boundary. Engine internals are logged server-side but never exposed to clients.

use thiserror::Error;

/// Error raised by the injected media engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    /// Create an engine error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Relay session operation error.
///
/// Maps to signaling `error` kinds:
/// - `InvalidId`: `invalid_id`
/// - `EmptyMessage`: `empty`
/// - `RateLimited`: `rate_limited`
/// - `NotFound`: `not_found`
/// - `NoTransport`: `no_transport`
/// - `EngineFailure`: `engine_failure`
/// - `ShuttingDown`: `shutting_down`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Thread id was empty after trimming.
    #[error("Invalid thread id")]
    InvalidId,

    /// Message text was empty after sanitizing.
    #[error("Message is empty")]
    EmptyMessage,

    /// Sender exceeded the message cap for the current window.
    #[error("Rate limited")]
    RateLimited,

    /// Peer or transport is unknown (signaling/core desync).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Produce/consume requested before any transport exists.
    #[error("No transport available")]
    NoTransport,

    /// The media engine rejected a call.
    #[error("Media engine failure: {0}")]
    EngineFailure(String),

    /// The relay service is shutting down.
    #[error("Service is shutting down")]
    ShuttingDown,
}

impl RelayError {
    /// Returns the wire-level error kind for this error.
    #[must_use]
    pub const fn error_kind(&self) -> &'static str {
        match self {
            RelayError::InvalidId => "invalid_id",
            RelayError::EmptyMessage => "empty",
            RelayError::RateLimited => "rate_limited",
            RelayError::NotFound(_) => "not_found",
            RelayError::NoTransport => "no_transport",
            RelayError::EngineFailure(_) => "engine_failure",
            RelayError::ShuttingDown => "shutting_down",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::EngineFailure(_) => "Media operation failed".to_string(),
            RelayError::NotFound(_) => "Resource not found".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the caller can simply retry or resubmit.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::InvalidId | RelayError::EmptyMessage | RelayError::RateLimited
        )
    }
}

impl From<EngineError> for RelayError {
    fn from(err: EngineError) -> Self {
        RelayError::EngineFailure(err.0)
    }
}

/// Fatal errors raised while assembling the relay service at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// No media engine was supplied to the builder.
    #[error("No media engine configured")]
    MissingMediaEngine,

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}
