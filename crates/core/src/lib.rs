//! Core traits and types for the voice call service
//!
//! This crate provides foundational types used across all other crates:
//! - Collaborator traits (transport engine, signaling gateway, speech-to-text)
//! - PCM frame types and resampling
//! - Error types

pub mod audio;
pub mod error;
pub mod traits;
pub mod transcript;

pub use audio::{PcmFrame, StreamResampler};
pub use error::{AsrError, SignalingError, TransportError};
pub use transcript::Transcript;

pub use traits::{
    CandidateEndpoint, CandidatePairStats, ConnectionState, FrameProducer, IceGatheringState,
    IceServerConfig, InboundAudioTrack, OutboundStreamStats, SignalingGateway, SpeechToText,
    TransportEngine, TransportEvent, TransportFactory, TransportStats,
};
