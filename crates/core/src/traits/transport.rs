//! Transport engine interface
//!
//! A transport engine owns one peer connection: ICE, DTLS, SRTP and RTP are
//! its business. The session only negotiates SDP through it, feeds it an
//! outbound frame producer and consumes its typed events.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{PcmFrame, TransportError};

/// ICE gathering progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// No media will flow again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Remote audio delivered as decoded mono f32 frames
pub struct InboundAudioTrack {
    pub track_id: String,
    pub sample_rate: u32,
    pub frames: mpsc::Receiver<Vec<f32>>,
}

impl fmt::Debug for InboundAudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundAudioTrack")
            .field("track_id", &self.track_id)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Events emitted by a transport engine
#[derive(Debug)]
pub enum TransportEvent {
    IceGatheringStateChanged(IceGatheringState),
    ConnectionStateChanged(ConnectionState),
    InboundTrack(InboundAudioTrack),
}

/// STUN/TURN server entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Cumulative counters of one outbound RTP stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutboundStreamStats {
    pub id: String,
    /// "audio" or "video"
    pub kind: String,
    pub bytes_sent: u64,
    pub packets_sent: u64,
}

/// One side of a candidate pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidateEndpoint {
    pub address: String,
    pub port: u16,
    /// "udp" or "tcp"
    pub protocol: String,
    /// host, srflx, prflx or relay
    pub candidate_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CandidatePairStats {
    pub id: String,
    /// Lowercase ICE pair state, e.g. "succeeded"
    pub state: String,
    pub nominated: bool,
    pub local: Option<CandidateEndpoint>,
    pub remote: Option<CandidateEndpoint>,
}

impl CandidatePairStats {
    /// The pair currently carrying media
    pub fn is_active(&self) -> bool {
        self.nominated && self.state == "succeeded"
    }
}

/// Snapshot of transport statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportStats {
    pub outbound: Vec<OutboundStreamStats>,
    pub candidate_pairs: Vec<CandidatePairStats>,
}

impl TransportStats {
    pub fn outbound_audio(&self) -> Option<&OutboundStreamStats> {
        self.outbound.iter().find(|s| s.kind == "audio")
    }

    pub fn active_pair(&self) -> Option<&CandidatePairStats> {
        self.candidate_pairs.iter().find(|p| p.is_active())
    }
}

/// Pull-based source of outbound audio frames
///
/// The transport's media loop calls `produce` once per frame interval.
pub trait FrameProducer: Send + Sync + 'static {
    fn produce(&self) -> PcmFrame;

    fn sample_rate(&self) -> u32;

    /// Samples per frame
    fn frame_size(&self) -> usize;
}

/// One peer connection
#[async_trait]
pub trait TransportEngine: Send + Sync + 'static {
    /// Take the event stream; returns `None` after the first call
    fn subscribe(&self) -> Option<mpsc::Receiver<TransportEvent>>;

    /// Attach an outbound audio track fed by `source`
    async fn add_audio_source(&self, source: Arc<dyn FrameProducer>)
        -> Result<(), TransportError>;

    /// Apply the remote offer
    async fn set_remote_offer(&self, sdp: &str) -> Result<(), TransportError>;

    /// Create and commit a local answer, returning its SDP
    async fn create_answer(&self) -> Result<String, TransportError>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Option<String>;

    fn ice_gathering_state(&self) -> IceGatheringState;

    fn connection_state(&self) -> ConnectionState;

    async fn stats(&self) -> Result<TransportStats, TransportError>;

    /// Release the connection; repeated calls are no-ops
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates one transport engine per call
#[async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    async fn create(&self, call_id: &str) -> Result<Arc<dyn TransportEngine>, TransportError>;
}
