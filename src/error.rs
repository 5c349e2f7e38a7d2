//! Error types for the masquerade crate.

use std::io;
use std::time::Duration;

use crate::response::TlsResponse;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the engine and the client facade.
///
/// The first group are transport-level failures raised while a request is in
/// flight. The engine folds those into a status `0` response; the facade then
/// surfaces them as [`Error::EngineFailure`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP protocol error (malformed frame, bad status line, ...).
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Redirect limit exceeded.
    #[error("Redirect limit exceeded ({count} redirects)")]
    RedirectLimit { count: u32 },

    /// Decompression error.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Request deadline exceeded.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Proxy negotiation failed.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Presented certificate chain matched none of the configured pins.
    #[error("Certificate pin mismatch for {host}")]
    PinMismatch { host: String },

    /// QUIC/HTTP3 error.
    #[error("QUIC error: {0}")]
    Quic(String),

    /// The exchange never produced an HTTP response.
    #[error("{message}")]
    EngineFailure { message: String },

    /// A response with status >= 400 was received and the caller asked for it
    /// to be raised.
    #[error("request failed with status: {}", response.status)]
    HttpStatus { response: Box<TlsResponse> },

    /// Malformed input rejected before any network activity.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown impersonation profile name.
    #[error("Unknown impersonation profile: {0}")]
    ProfileNotFound(String),

    /// The registry could not confirm a session was destroyed.
    #[error("Session {session_id}: {message}")]
    SessionLifecycle { session_id: String, message: String },
}

impl Error {
    /// Create an HTTP protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a QUIC error.
    pub fn quic(message: impl Into<String>) -> Self {
        Self::Quic(message.into())
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an IO error with custom message.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(io::Error::other(message.into()))
    }

    /// Whether this error means no HTTP response was produced.
    pub fn is_engine_failure(&self) -> bool {
        matches!(self, Self::EngineFailure { .. })
    }

    /// Whether this error was raised for an HTTP status >= 400.
    pub fn is_http_status(&self) -> bool {
        matches!(self, Self::HttpStatus { .. })
    }

    /// Whether the input was rejected before touching the network.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ProfileNotFound(_))
    }

    /// The response attached to an [`Error::HttpStatus`].
    pub fn response(&self) -> Option<&TlsResponse> {
        match self {
            Self::HttpStatus { response } => Some(response),
            _ => None,
        }
    }
}
