//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Backend             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Unauthorized           │ │
//! │  │  Validation     │  │  Timeout        │  │  Http                   │ │
//! │  │  InvalidUrl     │  │  Offline        │  │  MalformedResponse      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Storage      │  │     Internal                                │  │
//! │  │                 │  │                                             │  │
//! │  │  Storage        │  │  Internal, ShuttingDown, ChannelError       │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant is `Clone` so that a cause can be fanned out to any number of
//! subscribers.

use snippet_core::{Failure, FailureKind, ValidationError};
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid SDK configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A field of the project configuration failed validation.
    #[error("Invalid project configuration: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to reach the backend.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request or connection timed out.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The device reports no connectivity.
    #[error("Device is offline")]
    Offline,

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error (push channel).
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Credentials rejected (401/403) after the allowed renewal.
    #[error("Unauthorized (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Failed to serialize a request or a file.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Token renewal failed for a reason other than a rejection.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Credential store read/write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine is shutting down.
    #[error("Snippet engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if err.is_decode() {
            SyncError::MalformedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_builder() {
            SyncError::InvalidUrl(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::ConnectionFailed("connection closed".into()),
            WsError::AlreadyClosed => SyncError::ConnectionFailed("already closed".into()),
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Builds the error for a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 401 || status == 403 {
            SyncError::Unauthorized { status }
        } else {
            SyncError::Http {
                status,
                message: message.into(),
            }
        }
    }

    /// Returns true if this error is recoverable and the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - Offline device
    /// - Server-side (5xx) and throttling (429) statuses
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Malformed responses (would repeat deterministically)
    /// - Client-side statuses such as 404
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Timeout(_)
            | SyncError::Offline
            | SyncError::WebSocketError(_) => true,
            SyncError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if the backend rejected the credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::Unauthorized { .. })
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::Validation(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true for failures that indicate a bug rather than an environment problem.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            SyncError::Internal(_)
                | SyncError::ChannelError(_)
                | SyncError::MalformedResponse(_)
                | SyncError::SerializationFailed(_)
        )
    }

    /// Converts into the serializable cause delivered to subscribers.
    pub fn to_failure(&self) -> Failure {
        let kind = match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Timeout(_)
            | SyncError::TlsError(_)
            | SyncError::WebSocketError(_) => FailureKind::Network,
            SyncError::Offline => FailureKind::Offline,
            SyncError::Unauthorized { .. } | SyncError::AuthFailed(_) => {
                FailureKind::Authentication
            }
            SyncError::Http { .. } => FailureKind::Server,
            SyncError::MalformedResponse(_) | SyncError::SerializationFailed(_) => {
                FailureKind::MalformedResponse
            }
            SyncError::InvalidConfig(_)
            | SyncError::Validation(_)
            | SyncError::InvalidUrl(_)
            | SyncError::ConfigLoadFailed(_)
            | SyncError::ConfigSaveFailed(_) => FailureKind::Configuration,
            SyncError::Storage(_)
            | SyncError::Internal(_)
            | SyncError::ShuttingDown
            | SyncError::ChannelError(_) => FailureKind::Internal,
        };

        let failure = Failure::new(kind, self.to_string(), self.is_retryable());
        match self {
            SyncError::Unauthorized { status } | SyncError::Http { status, .. } => {
                failure.with_status(*status)
            }
            _ => failure,
        }
    }
}
