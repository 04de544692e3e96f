//! Collaborator traits
//!
//! Each external system a call depends on sits behind one of these traits so
//! the session state machine can be driven by fakes in tests.

mod signaling;
mod speech;
mod transport;

pub use signaling::SignalingGateway;
pub use speech::SpeechToText;
pub use transport::{
    CandidateEndpoint, CandidatePairStats, ConnectionState, FrameProducer, IceGatheringState,
    IceServerConfig, InboundAudioTrack, OutboundStreamStats, TransportEngine, TransportEvent,
    TransportFactory, TransportStats,
};
