//! Call error taxonomy

use std::fmt;

use thiserror::Error;

use voice_call_core::TransportError;

/// Which signaling step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingStep {
    PreAccept,
    Accept,
}

impl fmt::Display for SignalingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreAccept => f.write_str("pre_accept"),
            Self::Accept => f.write_str("accept"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// Transport refused the remote offer
    #[error("Remote offer rejected: {0}")]
    NegotiationRejected(String),

    /// Pre-accept or accept did not succeed; never retried
    #[error("Signaling {step} rejected: {reason}")]
    SignalingRejected { step: SignalingStep, reason: String },

    #[error("Timed out waiting for {0}")]
    TransportTimeout(&'static str),

    #[error("Transcription failed: {0}")]
    TranscriptionFailure(String),

    #[error("Transport stats unavailable: {0}")]
    StatsUnavailable(String),

    #[error("Unknown call: {0}")]
    UnknownCall(String),

    #[error("Call {0} already exists")]
    AlreadyExists(String),

    /// Setup interrupted by a terminate
    #[error("Call setup cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl CallError {
    /// Fatal errors end the call and release its transport
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NegotiationRejected(_) | Self::SignalingRejected { .. } | Self::Transport(_)
        )
    }

    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NegotiationRejected(_) => "negotiation_rejected",
            Self::SignalingRejected {
                step: SignalingStep::PreAccept,
                ..
            } => "pre_accept_rejected",
            Self::SignalingRejected {
                step: SignalingStep::Accept,
                ..
            } => "accept_rejected",
            Self::TransportTimeout(_) => "transport_timeout",
            Self::TranscriptionFailure(_) => "transcription_failure",
            Self::StatsUnavailable(_) => "stats_unavailable",
            Self::UnknownCall(_) => "unknown_call",
            Self::AlreadyExists(_) => "already_exists",
            Self::Cancelled => "cancelled",
            Self::Transport(_) => "transport",
        }
    }
}
