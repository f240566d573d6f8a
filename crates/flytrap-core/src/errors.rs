//! Error types for the Flytrap engagement client
//!
//! This module contains all error types used across the client crates:
//! transport faults, request/response service failures, session lifecycle
//! errors, frame decoding errors, and the FlytrapError type that unifies
//! them all.
//!
//! Transport faults are absorbed into state and notifications by the
//! transport layer and never cross into callers as errors; lifecycle and
//! service faults propagate as rejected operations so the caller can retry,
//! notify, or roll back.

use crate::types::SessionId;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Transport-level error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {url} failed: {reason}")]
    ConnectFailed { url: String, reason: String },
    #[error("Connection closed: {reason}")]
    Closed { reason: String },
    #[error("Invalid transport URL: {url}")]
    InvalidUrl { url: String },
    #[error("Reconnect budget exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("Transport is already running")]
    AlreadyRunning,
}

/// Request/response service error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request to {endpoint} failed: {reason}")]
    Request { endpoint: String, reason: String },
    #[error("Service returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("Failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Session lifecycle error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No active session")]
    NoActiveSession,
    #[error("Session mismatch: expected {expected}, got {actual}")]
    SessionMismatch {
        expected: SessionId,
        actual: SessionId,
    },
    #[error("Message {message_id} not found in the active session")]
    MessageNotFound { message_id: String },
    #[error("Message {message_id} is not in a retryable state")]
    NotRetryable { message_id: String },
}

/// Frame decoding error types
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed frame: {reason}")]
    Malformed { reason: String },
    #[error("Frame payload did not match event {event}: {reason}")]
    PayloadShape { event: String, reason: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Flytrap client
#[derive(Debug, thiserror::Error)]
pub enum FlytrapError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Service error: {0}")]
    Api(#[from] ApiError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Internal channel communication error
    #[error("Channel error: {message}")]
    Channel { message: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl FlytrapError {
    /// Create a transport connect-failed error
    pub fn connect_failed<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        FlytrapError::Transport(TransportError::ConnectFailed {
            url: url.into(),
            reason: reason.into(),
        })
    }

    /// Create a malformed-frame error
    pub fn malformed_frame<R: Into<String>>(reason: R) -> Self {
        FlytrapError::Frame(FrameError::Malformed {
            reason: reason.into(),
        })
    }

    /// Create a configuration error with a reason
    pub fn config_error<R: Into<String>>(reason: R) -> Self {
        FlytrapError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<M: Into<String>>(message: M) -> Self {
        FlytrapError::Channel {
            message: message.into(),
        }
    }

    /// Create a no-active-session error
    pub fn no_active_session() -> Self {
        FlytrapError::Session(SessionError::NoActiveSession)
    }

    /// Create a session-mismatch error
    pub fn session_mismatch(expected: SessionId, actual: SessionId) -> Self {
        FlytrapError::Session(SessionError::SessionMismatch { expected, actual })
    }

    /// Create a service status error
    pub fn api_status<D: Into<String>>(status: u16, detail: D) -> Self {
        FlytrapError::Api(ApiError::Status {
            status,
            detail: detail.into(),
        })
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, FlytrapError>;
pub type FlytrapResult<T> = Result<T>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
