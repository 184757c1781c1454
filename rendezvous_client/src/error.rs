//! Error types for the signaling client

use crate::PeerId;
use thiserror::Error;

/// Errors raised by a single HTTP exchange with the rendezvous server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// No response within the deadline
    ///
    /// Routine for long-poll requests against `/wait`.
    #[error("Request timed out")]
    Timeout,

    /// Body or headers could not be read or did not follow the protocol
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Server URL or request path could not be turned into a URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors surfaced by the signaling session
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Sign-in was rejected or its response could not be understood
    #[error("Sign-in failed: {0}")]
    SignInFailed(String),

    /// A message was not acknowledged by the server
    #[error("Failed to send message to peer {peer}: {reason}")]
    SendFailed {
        /// Addressed peer
        peer: PeerId,
        /// What went wrong
        reason: String,
    },

    /// Operation requires a signed-in session
    #[error("Not signed in")]
    NotSignedIn,

    /// Messages cannot be addressed to the session's own id
    #[error("Cannot send a message to self")]
    SelfAddressed,

    /// Operation is not allowed in the current state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// State(s) the operation needs
        expected: &'static str,
        /// State the session was in
        actual: &'static str,
    },

    /// A signaling body could not be interpreted
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Server answered with a non-2xx status
    #[error("Server rejected request with status {status}")]
    ServerRejected {
        /// HTTP status code
        status: u16,
    },

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from loading or validating client configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value the client cannot run with
    #[error("Invalid value for {field}: {message}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        message: String,
    },

    /// An environment variable could not be parsed
    #[error("Cannot parse environment variable {name}: {value:?}")]
    Env {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },
}
