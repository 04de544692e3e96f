//! WebRTC transport implementation
//!
//! One `WebRtcTransport` per call. Peer connection callbacks only translate
//! webrtc-rs state into `TransportEvent`s and push them onto a channel; all
//! decisions are made by whoever subscribed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::API;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use voice_call_config::constants::webrtc::{
    ICE_DISCONNECTED_TIMEOUT_SECS, ICE_FAILED_TIMEOUT_SECS, ICE_KEEPALIVE_INTERVAL_SECS,
};
use voice_call_config::Settings;
use voice_call_core::audio::pcm16_to_f32;
use voice_call_core::{
    CandidateEndpoint, CandidatePairStats, ConnectionState, FrameProducer, IceGatheringState,
    IceServerConfig, InboundAudioTrack, OutboundStreamStats, TransportEngine, TransportEvent,
    TransportFactory, TransportStats,
};

use crate::codec::{OpusDecoder, OpusEncoder};
use crate::TransportError;

/// Opus always runs at 48kHz on the wire
const OPUS_CLOCK_RATE: u32 = 48_000;
const OPUS_PAYLOAD_TYPE: u8 = 111;
const EVENT_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 100;

/// WebRTC configuration
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<IceServerConfig>,
    /// Outbound frame duration
    pub frame_duration: Duration,
    /// Stream id advertised for the outbound track
    pub stream_id: String,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            frame_duration: Duration::from_millis(20),
            stream_id: "voice-call".to_string(),
        }
    }
}

impl From<&Settings> for WebRtcConfig {
    fn from(settings: &Settings) -> Self {
        let mut ice_servers: Vec<IceServerConfig> = Vec::new();

        if !settings.ice.stun_servers.is_empty() {
            ice_servers.push(IceServerConfig {
                urls: settings.ice.stun_servers.clone(),
                username: None,
                credential: None,
            });
        }

        ice_servers.extend(settings.ice.turn_servers.iter().map(|t| IceServerConfig {
            urls: vec![t.url.clone()],
            username: Some(t.username.clone()),
            credential: Some(t.credential.clone()),
        }));

        Self {
            ice_servers,
            frame_duration: Duration::from_millis(settings.media.frame_ms as u64),
            ..Default::default()
        }
    }
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: OPUS_CLOCK_RATE,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Create WebRTC API with media engine
fn create_api() -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: opus_capability(),
                payload_type: OPUS_PAYLOAD_TYPE,
                stats_id: String::new(),
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| TransportError::Internal(e.to_string()))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| TransportError::Internal(e.to_string()))?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_timeouts(
        Some(Duration::from_secs(ICE_DISCONNECTED_TIMEOUT_SECS)),
        Some(Duration::from_secs(ICE_FAILED_TIMEOUT_SECS)),
        Some(Duration::from_secs(ICE_KEEPALIVE_INTERVAL_SECS)),
    );

    Ok(webrtc::api::APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

fn create_rtc_config(config: &WebRtcConfig) -> RTCConfiguration {
    let ice_servers: Vec<RTCIceServer> = config
        .ice_servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

fn map_connection_state(s: RTCPeerConnectionState) -> Option<ConnectionState> {
    match s {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn map_gathering_state(s: RTCIceGathererState) -> Option<IceGatheringState> {
    match s {
        RTCIceGathererState::New => Some(IceGatheringState::New),
        RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
        RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
        _ => None,
    }
}

/// WebRTC transport for one call
pub struct WebRtcTransport {
    call_id: String,
    config: WebRtcConfig,
    pc: Arc<RTCPeerConnection>,
    event_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    gathering: Arc<RwLock<IceGatheringState>>,
    connection: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl WebRtcTransport {
    /// Create the peer connection and install its callbacks
    pub async fn new(call_id: &str, config: WebRtcConfig) -> Result<Self, TransportError> {
        let api = create_api()?;
        let pc = api
            .new_peer_connection(create_rtc_config(&config))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let pc = Arc::new(pc);

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let gathering = Arc::new(RwLock::new(IceGatheringState::New));
        let connection = Arc::new(RwLock::new(ConnectionState::New));
        let cancel = CancellationToken::new();

        let transport = Self {
            call_id: call_id.to_string(),
            config,
            pc,
            event_rx: Mutex::new(Some(event_rx)),
            gathering,
            connection,
            cancel,
            closed: AtomicBool::new(false),
        };
        transport.install_handlers(event_tx);

        Ok(transport)
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    fn install_handlers(&self, event_tx: mpsc::Sender<TransportEvent>) {
        let connection = self.connection.clone();
        let tx = event_tx.clone();
        let call_id = self.call_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = map_connection_state(s);
                if let Some(state) = state {
                    *connection.write() = state;
                    tracing::info!(call_id = %call_id, state = %state, "Peer connection state changed");
                }

                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(state) = state {
                        let _ = tx.send(TransportEvent::ConnectionStateChanged(state)).await;
                    }
                })
            }));

        let gathering = self.gathering.clone();
        let tx = event_tx.clone();
        let call_id = self.call_id.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                let state = map_gathering_state(s);
                if let Some(state) = state {
                    *gathering.write() = state;
                    tracing::debug!(call_id = %call_id, state = ?state, "ICE gathering state changed");
                }

                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(state) = state {
                        let _ = tx.send(TransportEvent::IceGatheringStateChanged(state)).await;
                    }
                })
            }));

        let tx = event_tx;
        let cancel = self.cancel.clone();
        let call_id = self.call_id.clone();
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let call_id = call_id.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    tracing::debug!(call_id = %call_id, kind = ?track.kind(), "Ignoring non-audio track");
                    return;
                }

                let (frames_tx, frames_rx) = mpsc::channel(INBOUND_BUFFER);
                let inbound = InboundAudioTrack {
                    track_id: track.id(),
                    sample_rate: OPUS_CLOCK_RATE,
                    frames: frames_rx,
                };
                tracing::info!(call_id = %call_id, track_id = %inbound.track_id, "Inbound audio track");

                if tx.send(TransportEvent::InboundTrack(inbound)).await.is_err() {
                    return;
                }

                tokio::spawn(read_inbound_track(track, frames_tx, cancel, call_id));
            })
        }));
    }
}

/// Decode RTP from a remote track until it ends, the consumer goes away or
/// the transport closes
async fn read_inbound_track(
    track: Arc<TrackRemote>,
    frames_tx: mpsc::Sender<Vec<f32>>,
    cancel: CancellationToken,
    call_id: String,
) {
    let decoder = match OpusDecoder::new(OPUS_CLOCK_RATE) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(call_id = %call_id, error = %e, "Cannot create Opus decoder");
            return;
        },
    };
    let plc_frame = (OPUS_CLOCK_RATE / 50) as usize;

    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            result = track.read_rtp() => match result {
                Ok((packet, _)) => packet,
                Err(e) => {
                    tracing::debug!(call_id = %call_id, error = %e, "Inbound track ended");
                    break;
                },
            },
        };

        if packet.payload.is_empty() {
            continue;
        }

        let pcm = match decoder.decode(&packet.payload) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "Opus decode error");
                match decoder.decode_plc(plc_frame) {
                    Ok(pcm) => pcm,
                    Err(_) => continue,
                }
            },
        };

        if frames_tx.send(pcm16_to_f32(&pcm)).await.is_err() {
            break;
        }
    }
}

/// Pull frames from `source` once per tick, encode and write them
async fn run_media_loop(
    track: Arc<TrackLocalStaticSample>,
    source: Arc<dyn FrameProducer>,
    encoder: OpusEncoder,
    frame_duration: Duration,
    cancel: CancellationToken,
    call_id: String,
) {
    let mut ticker = tokio::time::interval(frame_duration);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let frame = source.produce();
        let payload = match encoder.encode(&frame.samples) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "Dropping outbound frame");
                continue;
            },
        };

        let sample = Sample {
            data: Bytes::from(payload),
            duration: frame_duration,
            ..Default::default()
        };

        if let Err(e) = track.write_sample(&sample).await {
            tracing::debug!(call_id = %call_id, error = %e, "Outbound write failed");
            continue;
        }

        sent += 1;
        if sent % 250 == 0 {
            tracing::debug!(call_id = %call_id, frames = sent, pts = frame.pts, "Outbound frames written");
        }
    }
}

#[async_trait]
impl TransportEngine for WebRtcTransport {
    fn subscribe(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.event_rx.lock().take()
    }

    async fn add_audio_source(
        &self,
        source: Arc<dyn FrameProducer>,
    ) -> Result<(), TransportError> {
        if source.sample_rate() != OPUS_CLOCK_RATE {
            return Err(TransportError::Media(format!(
                "Outbound audio must be {} Hz, got {}",
                OPUS_CLOCK_RATE,
                source.sample_rate()
            )));
        }
        let encoder = OpusEncoder::new(OPUS_CLOCK_RATE)?;

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            "audio".to_string(),
            self.config.stream_id.clone(),
        ));

        let rtp_sender = self
            .pc
            .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::Media(format!("Failed to add audio track: {}", e)))?;

        // RTCP must be read for interceptors (NACK, reports) to work
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = rtp_sender.read(&mut buf) => {
                        if result.is_err() {
                            break;
                        }
                    },
                }
            }
        });

        tokio::spawn(run_media_loop(
            track,
            source,
            encoder,
            self.config.frame_duration,
            self.cancel.clone(),
            self.call_id.clone(),
        ));

        Ok(())
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<(), TransportError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))
    }

    async fn create_answer(&self) -> Result<String, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        // Triggers ICE gathering
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        Ok(answer.sdp)
    }

    async fn local_description(&self) -> Option<String> {
        self.pc.local_description().await.map(|d| d.sdp)
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        *self.gathering.read()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    async fn stats(&self) -> Result<TransportStats, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let report = self.pc.get_stats().await;
        let mut stats = TransportStats::default();
        let mut local = std::collections::HashMap::new();
        let mut remote = std::collections::HashMap::new();
        let mut pairs = Vec::new();

        for (id, entry) in report.reports.iter() {
            match entry {
                StatsReportType::OutboundRTP(o) => stats.outbound.push(OutboundStreamStats {
                    id: id.clone(),
                    kind: o.kind.to_string(),
                    bytes_sent: o.bytes_sent,
                    packets_sent: o.packets_sent,
                }),
                StatsReportType::LocalCandidate(c) => {
                    local.insert(c.id.clone(), candidate_endpoint(c));
                },
                StatsReportType::RemoteCandidate(c) => {
                    remote.insert(c.id.clone(), candidate_endpoint(c));
                },
                StatsReportType::CandidatePair(p) => pairs.push((
                    id.clone(),
                    p.local_candidate_id.clone(),
                    p.remote_candidate_id.clone(),
                    format!("{:?}", p.state).to_lowercase(),
                    p.nominated,
                )),
                _ => {},
            }
        }

        stats.candidate_pairs = pairs
            .into_iter()
            .map(|(id, local_id, remote_id, state, nominated)| CandidatePairStats {
                id,
                state,
                nominated,
                local: local.get(&local_id).cloned(),
                remote: remote.get(&remote_id).cloned(),
            })
            .collect();

        Ok(stats)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.cancel.cancel();
        *self.connection.write() = ConnectionState::Closed;

        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        tracing::info!(call_id = %self.call_id, "Transport closed");
        Ok(())
    }
}

fn candidate_endpoint(c: &webrtc::stats::ICECandidateStats) -> CandidateEndpoint {
    let network = format!("{:?}", c.network_type).to_lowercase();
    let protocol = if network.starts_with("tcp") { "tcp" } else { "udp" };

    CandidateEndpoint {
        address: c.ip.clone(),
        port: c.port,
        protocol: protocol.to_string(),
        candidate_type: format!("{:?}", c.candidate_type).to_lowercase(),
    }
}

/// Builds one `WebRtcTransport` per call
pub struct WebRtcTransportFactory {
    config: WebRtcConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self, call_id: &str) -> Result<Arc<dyn TransportEngine>, TransportError> {
        let transport = WebRtcTransport::new(call_id, self.config.clone()).await?;
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webrtc_config_default() {
        let config = WebRtcConfig::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.frame_duration, Duration::from_millis(20));
    }

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::default();
        settings.ice.turn_servers.push(voice_call_config::TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        });

        let config = WebRtcConfig::from(&settings);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_transport_new_and_close() {
        let config = WebRtcConfig {
            ice_servers: vec![],
            ..Default::default()
        };
        let transport = WebRtcTransport::new("call-1", config).await.unwrap();
        assert_eq!(transport.connection_state(), ConnectionState::New);
        assert_eq!(transport.ice_gathering_state(), IceGatheringState::New);
        assert!(transport.local_description().await.is_none());

        assert!(transport.subscribe().is_some());
        assert!(transport.subscribe().is_none());

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.connection_state(), ConnectionState::Closed);
        assert!(matches!(transport.stats().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_rejects_offer_garbage() {
        let config = WebRtcConfig {
            ice_servers: vec![],
            ..Default::default()
        };
        let transport = WebRtcTransport::new("call-2", config).await.unwrap();
        let result = transport.set_remote_offer("not an sdp").await;
        assert!(matches!(result, Err(TransportError::Negotiation(_))));
        transport.close().await.unwrap();
    }
}
