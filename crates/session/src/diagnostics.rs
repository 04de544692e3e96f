//! Periodic transport health checks

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use voice_call_core::{CandidatePairStats, TransportEngine, TransportStats};

/// Outcome of inspecting one stats snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsReport {
    /// Outbound audio counter did not move since the previous reading
    pub stalled: bool,
    pub outbound_found: bool,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub active_path: Option<CandidatePairStats>,
}

/// Tracks outbound progress between polls
#[derive(Debug, Default)]
pub struct DiagnosticsMonitor {
    last_bytes: u64,
}

impl DiagnosticsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a snapshot against the previous one
    pub fn inspect(&mut self, stats: &TransportStats) -> DiagnosticsReport {
        let outbound = stats.outbound_audio();
        let (bytes_sent, packets_sent) = outbound.map_or((0, 0), |o| (o.bytes_sent, o.packets_sent));

        let stalled = outbound.is_some() && bytes_sent == self.last_bytes;
        self.last_bytes = bytes_sent;

        DiagnosticsReport {
            stalled,
            outbound_found: outbound.is_some(),
            bytes_sent,
            packets_sent,
            active_path: stats.active_pair().cloned(),
        }
    }

    /// Poll until cancelled or the transport reaches a terminal state
    pub async fn run(
        mut self,
        call_id: String,
        transport: Arc<dyn TransportEngine>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_path: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            let state = transport.connection_state();
            if state.is_terminal() {
                tracing::info!(call_id = %call_id, state = %state, "Transport ended, stopping diagnostics");
                break;
            }

            let stats = match transport.stats().await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::warn!(call_id = %call_id, error = %e, "Transport stats unavailable");
                    continue;
                },
            };

            let report = self.inspect(&stats);

            if !report.outbound_found {
                tracing::debug!(call_id = %call_id, "No outbound audio stream yet");
            } else if report.stalled {
                metrics::counter!("voice_call_media_stalls_total").increment(1);
                tracing::warn!(
                    call_id = %call_id,
                    bytes_sent = report.bytes_sent,
                    "Outbound audio not flowing"
                );
            } else {
                tracing::debug!(
                    call_id = %call_id,
                    bytes_sent = report.bytes_sent,
                    packets_sent = report.packets_sent,
                    "Outbound audio flowing"
                );
            }

            if let Some(pair) = report.active_path {
                let path = describe_path(&pair);
                if last_path.as_deref() != Some(path.as_str()) {
                    tracing::info!(call_id = %call_id, path = %path, "Active network path");
                    last_path = Some(path);
                }
            }
        }
    }
}

fn describe_path(pair: &CandidatePairStats) -> String {
    let endpoint = |e: &Option<voice_call_core::CandidateEndpoint>| match e {
        Some(e) => format!("{}:{} ({})", e.address, e.port, e.candidate_type),
        None => "?".to_string(),
    };
    let protocol = pair
        .local
        .as_ref()
        .map(|e| e.protocol.as_str())
        .unwrap_or("udp");

    format!("{} -> {} [{}]", endpoint(&pair.local), endpoint(&pair.remote), protocol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::RwLock;
    use tokio::sync::mpsc;
    use voice_call_core::{
        CandidateEndpoint, ConnectionState, FrameProducer, IceGatheringState,
        OutboundStreamStats, TransportError, TransportEvent,
    };

    /// Stats fail on the first poll and the transport closes on the third
    struct FlakyTransport {
        polls: AtomicUsize,
        state: RwLock<ConnectionState>,
    }

    #[async_trait]
    impl TransportEngine for FlakyTransport {
        fn subscribe(&self) -> Option<mpsc::Receiver<TransportEvent>> {
            None
        }

        async fn add_audio_source(
            &self,
            _source: Arc<dyn FrameProducer>,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn set_remote_offer(&self, _sdp: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn create_answer(&self) -> Result<String, TransportError> {
            Ok(String::new())
        }

        async fn local_description(&self) -> Option<String> {
            None
        }

        fn ice_gathering_state(&self) -> IceGatheringState {
            IceGatheringState::Complete
        }

        fn connection_state(&self) -> ConnectionState {
            *self.state.read()
        }

        async fn stats(&self) -> Result<TransportStats, TransportError> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match poll {
                1 => Err(TransportError::Media("stats unavailable".into())),
                3 => {
                    *self.state.write() = ConnectionState::Closed;
                    Ok(stats(300))
                },
                n => Ok(stats(n as u64 * 100)),
            }
        }

        async fn close(&self) -> Result<(), TransportError> {
            *self.state.write() = ConnectionState::Closed;
            Ok(())
        }
    }

    fn stats(bytes: u64) -> TransportStats {
        TransportStats {
            outbound: vec![OutboundStreamStats {
                id: "out".into(),
                kind: "audio".into(),
                bytes_sent: bytes,
                packets_sent: bytes / 100,
            }],
            candidate_pairs: vec![CandidatePairStats {
                id: "pair".into(),
                state: "succeeded".into(),
                nominated: true,
                local: Some(CandidateEndpoint {
                    address: "10.0.0.1".into(),
                    port: 5000,
                    protocol: "udp".into(),
                    candidate_type: "host".into(),
                }),
                remote: Some(CandidateEndpoint {
                    address: "157.240.1.1".into(),
                    port: 3478,
                    protocol: "udp".into(),
                    candidate_type: "srflx".into(),
                }),
            }],
        }
    }

    #[test]
    fn test_detects_stall() {
        let mut monitor = DiagnosticsMonitor::new();
        assert!(!monitor.inspect(&stats(1_000)).stalled);
        assert!(!monitor.inspect(&stats(2_000)).stalled);
        assert!(monitor.inspect(&stats(2_000)).stalled);
    }

    #[test]
    fn test_zero_bytes_from_start_is_stall() {
        let mut monitor = DiagnosticsMonitor::new();
        assert!(monitor.inspect(&stats(0)).stalled);
    }

    #[test]
    fn test_missing_outbound_is_not_stall() {
        let mut monitor = DiagnosticsMonitor::new();
        let report = monitor.inspect(&TransportStats::default());
        assert!(!report.outbound_found);
        assert!(!report.stalled);
        assert!(report.active_path.is_none());
    }

    #[test]
    fn test_reports_active_path() {
        let mut monitor = DiagnosticsMonitor::new();
        let report = monitor.inspect(&stats(10));
        let pair = report.active_path.unwrap();
        assert_eq!(
            describe_path(&pair),
            "10.0.0.1:5000 (host) -> 157.240.1.1:3478 (srflx) [udp]"
        );
    }

    #[tokio::test]
    async fn test_run_survives_stats_errors_and_stops_when_closed() {
        let transport = Arc::new(FlakyTransport {
            polls: AtomicUsize::new(0),
            state: RwLock::new(ConnectionState::Connected),
        });
        let cancel = CancellationToken::new();

        let run = DiagnosticsMonitor::new().run(
            "call-diag".into(),
            transport.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        );
        let finished = tokio::time::timeout(Duration::from_secs(2), run).await;

        assert!(finished.is_ok(), "diagnostics kept polling a closed transport");
        assert!(!cancel.is_cancelled());
        assert_eq!(transport.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let transport = Arc::new(FlakyTransport {
            polls: AtomicUsize::new(1),
            state: RwLock::new(ConnectionState::Connected),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = DiagnosticsMonitor::new().run(
            "call-diag".into(),
            transport.clone(),
            Duration::from_millis(10),
            cancel,
        );
        assert!(tokio::time::timeout(Duration::from_secs(1), run).await.is_ok());
    }
}
