//! Error types shared across crates

use thiserror::Error;

/// Errors raised by a transport engine
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("SDP negotiation failed: {0}")]
    Negotiation(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Transport closed")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the signaling gateway
#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    /// Request never produced a response
    #[error("Signaling request failed: {0}")]
    Transport(String),

    /// Platform answered with a non-success status
    #[error("Signaling rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors raised by a speech-to-text engine
#[derive(Error, Debug, Clone)]
pub enum AsrError {
    #[error("ASR request failed: {0}")]
    Request(String),

    #[error("ASR service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("Invalid ASR response: {0}")]
    InvalidResponse(String),

    #[error("ASR timed out")]
    Timeout,
}
