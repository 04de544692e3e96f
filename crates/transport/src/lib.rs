//! WebRTC transport engine
//!
//! Implements the core `TransportEngine` trait over `webrtc-rs`, with Opus
//! in both directions:
//! - Outbound: a pull loop asks a `FrameProducer` for one frame per tick,
//!   encodes it and writes it to a local sample track
//! - Inbound: remote audio tracks are decoded to f32 PCM and handed to the
//!   session through a channel carried in the track event

pub mod codec;
pub mod webrtc;

pub use codec::{OpusDecoder, OpusEncoder};
pub use voice_call_core::TransportError;
pub use webrtc::{WebRtcConfig, WebRtcTransport, WebRtcTransportFactory};
