//! Call session state machine
//!
//! One `CallSession` per call. It owns the transport, the looping source and
//! (once the caller's audio arrives) the inbound accumulator, and runs the
//! negotiation sequence:
//!
//! ```text
//! Created -> OfferSet -> AnswerLocal -> IceGathering -> PreAccepted -> Accepted -> Active
//!    \__________\___________\______________\______________\___________\-> Failed
//! any -> Terminated
//! ```
//!
//! Every background task runs under the session's cancellation token and
//! task tracker; `teardown` is the single idempotent cleanup path.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use voice_call_config::{Settings, TranscriptionConfig};
use voice_call_core::{
    ConnectionState, FrameProducer, IceGatheringState, InboundAudioTrack, SignalingGateway,
    SpeechToText, TransportEngine, TransportError, TransportEvent,
};

use crate::accumulator::{
    run_transcription_loop, AccumulatorConfig, InboundAudioAccumulator, SharedAccumulator,
};
use crate::diagnostics::DiagnosticsMonitor;
use crate::error::{CallError, SignalingStep};
use crate::events::CallSessionEvent;
use crate::looping::LoopingAudioSource;
use crate::registry::CallRegistry;
use crate::sdp;

/// Call session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Created,
    OfferSet,
    AnswerLocal,
    IceGathering,
    PreAccepted,
    Accepted,
    Active,
    Terminated,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::OfferSet => "offer_set",
            Self::AnswerLocal => "answer_local",
            Self::IceGathering => "ice_gathering",
            Self::PreAccepted => "pre_accepted",
            Self::Accepted => "accepted",
            Self::Active => "active",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-call timing and media parameters
#[derive(Debug, Clone)]
pub struct CallSessionConfig {
    pub ice_gather_timeout: Duration,
    pub connect_timeout: Duration,
    pub diagnostics_interval: Duration,
    pub teardown_grace: Duration,
    /// Samples per outbound frame
    pub frame_size: usize,
    pub transcription: TranscriptionConfig,
}

impl Default for CallSessionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for CallSessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            ice_gather_timeout: Duration::from_millis(settings.call.ice_gather_timeout_ms),
            connect_timeout: Duration::from_millis(settings.call.connect_timeout_ms),
            diagnostics_interval: Duration::from_millis(settings.call.diagnostics_interval_ms),
            teardown_grace: Duration::from_millis(settings.call.teardown_grace_ms),
            frame_size: settings.media.frame_samples(),
            transcription: settings.transcription.clone(),
        }
    }
}

/// Caller metadata, fixed at creation
#[derive(Debug, Clone, Serialize)]
pub struct CallInfo {
    pub call_id: String,
    pub caller_number: String,
    pub caller_name: String,
}

/// Collaborators handed to each session
#[derive(Clone)]
pub struct CallDeps {
    pub transport: Arc<dyn TransportEngine>,
    pub signaling: Arc<dyn SignalingGateway>,
    pub asr: Option<Arc<dyn SpeechToText>>,
}

/// State of one call
pub struct CallSession {
    uid: Uuid,
    info: CallInfo,
    config: Arc<CallSessionConfig>,
    state: RwLock<CallState>,
    transport: Arc<dyn TransportEngine>,
    signaling: Arc<dyn SignalingGateway>,
    asr: Option<Arc<dyn SpeechToText>>,
    source: Arc<LoopingAudioSource>,
    accumulator: Mutex<Option<SharedAccumulator>>,
    events: broadcast::Sender<CallSessionEvent>,
    gathering: watch::Sender<IceGatheringState>,
    connection: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    torn_down: AtomicBool,
    inbound_frames: AtomicU64,
    created_at: SystemTime,
    started: Instant,
}

impl CallSession {
    pub fn new(
        info: CallInfo,
        config: Arc<CallSessionConfig>,
        source: LoopingAudioSource,
        deps: CallDeps,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        let (gathering, _) = watch::channel(deps.transport.ice_gathering_state());
        let (connection, _) = watch::channel(deps.transport.connection_state());

        Self {
            uid: Uuid::new_v4(),
            info,
            config,
            state: RwLock::new(CallState::Created),
            transport: deps.transport,
            signaling: deps.signaling,
            asr: deps.asr,
            source: Arc::new(source),
            accumulator: Mutex::new(None),
            events,
            gathering,
            connection,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            torn_down: AtomicBool::new(false),
            inbound_frames: AtomicU64::new(0),
            created_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    /// Distinguishes sessions reusing the same call id
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn call_id(&self) -> &str {
        &self.info.call_id
    }

    pub fn info(&self) -> &CallInfo {
        &self.info
    }

    pub fn state(&self) -> CallState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallSessionEvent> {
        self.events.subscribe()
    }

    pub fn source(&self) -> &LoopingAudioSource {
        &self.source
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn inbound_frames(&self) -> u64 {
        self.inbound_frames.load(Ordering::Relaxed)
    }

    /// Seconds of caller audio buffered for transcription
    pub fn buffered_secs(&self) -> Option<f32> {
        self.accumulator.lock().as_ref().map(|a| a.lock().buffered_secs())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn transition(&self, new: CallState) -> Result<(), CallError> {
        let old = {
            let mut state = self.state.write();
            let old = *state;
            if old.is_terminal() {
                return Err(CallError::Cancelled);
            }
            *state = new;
            old
        };

        if old != new {
            tracing::info!(call_id = %self.info.call_id, from = %old, to = %new, "Call state changed");
            let _ = self.events.send(CallSessionEvent::StateChanged { old, new });
        }
        Ok(())
    }

    fn force_state(&self, new: CallState) {
        let old = std::mem::replace(&mut *self.state.write(), new);
        if old != new {
            tracing::info!(call_id = %self.info.call_id, from = %old, to = %new, "Call state changed");
            let _ = self.events.send(CallSessionEvent::StateChanged { old, new });
        }
    }

    /// Run negotiation until the call is active
    ///
    /// Returns `Cancelled` if teardown started meanwhile. The caller owns
    /// cleanup on error.
    pub async fn establish(
        self: &Arc<Self>,
        offer_sdp: &str,
        registry: &CallRegistry,
    ) -> Result<(), CallError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CallError::Cancelled),
            result = self.negotiate(offer_sdp, registry) => result,
        }
    }

    async fn negotiate(
        self: &Arc<Self>,
        offer_sdp: &str,
        registry: &CallRegistry,
    ) -> Result<(), CallError> {
        let call_id = self.info.call_id.as_str();

        let events = self.transport.subscribe().ok_or_else(|| {
            CallError::Transport(TransportError::Internal(
                "transport events already subscribed".to_string(),
            ))
        })?;
        self.spawn_event_pump(events);

        self.transport
            .add_audio_source(self.source.clone() as Arc<dyn FrameProducer>)
            .await?;

        self.transport
            .set_remote_offer(offer_sdp)
            .await
            .map_err(|e| CallError::NegotiationRejected(e.to_string()))?;
        self.transition(CallState::OfferSet)?;

        let answer = self
            .transport
            .create_answer()
            .await
            .map_err(|e| CallError::NegotiationRejected(e.to_string()))?;
        self.transition(CallState::AnswerLocal)?;

        self.transition(CallState::IceGathering)?;
        self.wait_for_gathering().await;

        let local = self.transport.local_description().await.unwrap_or(answer);
        let answer_sdp = sdp::sanitize(&local);

        self.signaling
            .pre_accept(call_id, &answer_sdp)
            .await
            .map_err(|e| CallError::SignalingRejected {
                step: SignalingStep::PreAccept,
                reason: e.to_string(),
            })?;
        self.transition(CallState::PreAccepted)?;

        self.signaling
            .accept(call_id, &answer_sdp)
            .await
            .map_err(|e| CallError::SignalingRejected {
                step: SignalingStep::Accept,
                reason: e.to_string(),
            })?;
        self.transition(CallState::Accepted)?;

        if let Err(e) = self.wait_for_connected().await {
            tracing::warn!(call_id = %call_id, error = %e, "Proceeding without connected transport");
        }

        if self.cancel.is_cancelled() || !registry.activate(call_id, self.uid) {
            return Err(CallError::Cancelled);
        }

        self.source.enable();
        // A teardown racing activation has already disabled the source
        if self.is_torn_down() || self.cancel.is_cancelled() {
            self.source.disable();
            return Err(CallError::Cancelled);
        }
        let _ = self.events.send(CallSessionEvent::MediaEnabled);
        self.spawn_diagnostics();
        self.transition(CallState::Active)?;

        tracing::info!(
            call_id = %call_id,
            caller = %self.info.caller_number,
            setup_ms = self.started.elapsed().as_millis() as u64,
            "Call active"
        );
        Ok(())
    }

    async fn wait_for_gathering(&self) {
        let mut rx = self.gathering.subscribe();
        let result = tokio::time::timeout(
            self.config.ice_gather_timeout,
            rx.wait_for(|s| *s == IceGatheringState::Complete),
        )
        .await
        .map(|r| r.map(|s| *s));

        match result {
            Ok(Ok(_)) => {
                tracing::debug!(call_id = %self.info.call_id, "ICE gathering complete");
            },
            Ok(Err(_)) => {},
            Err(_) => {
                tracing::warn!(
                    call_id = %self.info.call_id,
                    timeout_ms = self.config.ice_gather_timeout.as_millis() as u64,
                    "ICE gathering timed out, answering with candidates gathered so far"
                );
            },
        }
    }

    async fn wait_for_connected(&self) -> Result<(), CallError> {
        let mut rx = self.connection.subscribe();
        let result = tokio::time::timeout(
            self.config.connect_timeout,
            rx.wait_for(|s| *s == ConnectionState::Connected || s.is_terminal()),
        )
        .await
        .map(|r| r.map(|s| *s));

        match result {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(Ok(state)) => Err(CallError::Transport(TransportError::ConnectionFailed(
                format!("transport {}", state),
            ))),
            Ok(Err(_)) => Err(CallError::Transport(TransportError::Closed)),
            Err(_) => Err(CallError::TransportTimeout("connected transport")),
        }
    }

    fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        let session = self.clone();
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                match event {
                    TransportEvent::IceGatheringStateChanged(state) => {
                        session.gathering.send_replace(state);
                    },
                    TransportEvent::ConnectionStateChanged(state) => {
                        session.connection.send_replace(state);
                        let _ = session
                            .events
                            .send(CallSessionEvent::TransportStateChanged(state));
                        if state.is_terminal() && session.state() == CallState::Active {
                            tracing::warn!(call_id = %session.info.call_id, state = %state, "Transport ended while call active");
                        }
                    },
                    TransportEvent::InboundTrack(track) => session.attach_inbound(track),
                }
            }
        });
    }

    fn spawn_diagnostics(&self) {
        let monitor = DiagnosticsMonitor::new();
        self.tracker.spawn(monitor.run(
            self.info.call_id.clone(),
            self.transport.clone(),
            self.config.diagnostics_interval,
            self.cancel.clone(),
        ));
    }

    fn attach_inbound(self: &Arc<Self>, track: InboundAudioTrack) {
        if self.cancel.is_cancelled() {
            return;
        }

        let accumulator = match &self.asr {
            Some(asr) => {
                let mut slot = self.accumulator.lock();
                if slot.is_some() {
                    None
                } else {
                    let config = AccumulatorConfig::from_transcription(
                        &self.config.transcription,
                        track.sample_rate,
                    );
                    let acc = InboundAudioAccumulator::shared(config);
                    *slot = Some(acc.clone());
                    Some((acc, asr.clone()))
                }
            },
            None => None,
        };

        if let Some((acc, asr)) = &accumulator {
            let events = self.events.clone();
            self.tracker.spawn(run_transcription_loop(
                self.info.call_id.clone(),
                acc.clone(),
                asr.clone(),
                self.config.transcription.language.clone(),
                self.cancel.clone(),
                move |transcript| {
                    let _ = events.send(CallSessionEvent::Transcript(transcript));
                },
            ));
        }

        let session = self.clone();
        let sink = accumulator.map(|(acc, _)| acc);
        self.tracker.spawn(session.read_inbound(track, sink));
    }

    async fn read_inbound(self: Arc<Self>, mut track: InboundAudioTrack, sink: Option<SharedAccumulator>) {
        let call_id = self.info.call_id.clone();
        tracing::info!(
            call_id = %call_id,
            track_id = %track.track_id,
            transcribing = sink.is_some(),
            "Reading caller audio"
        );

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = track.frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if let Some(acc) = &sink {
                acc.lock().append(&frame);
            }

            let n = self.inbound_frames.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 50 == 0 {
                tracing::debug!(call_id = %call_id, frames = n, samples = frame.len(), "Caller audio received");
            }
        }

        tracing::debug!(call_id = %call_id, "Caller audio reader stopped");
    }

    /// Release everything the call owns; repeated calls are no-ops
    ///
    /// `failed` selects the final state: `Failed` for aborted setups,
    /// `Terminated` otherwise.
    pub async fn teardown(&self, registry: &CallRegistry, failed: bool) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let call_id = self.info.call_id.as_str();
        registry.remove_if(call_id, self.uid);

        self.cancel.cancel();
        self.source.disable();
        if let Some(acc) = self.accumulator.lock().as_ref() {
            acc.lock().stop();
        }

        self.tracker.close();
        if tokio::time::timeout(self.config.teardown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(call_id = %call_id, tasks = self.tracker.len(), "Call tasks still running after grace period");
        }

        if let Err(e) = self.transport.close().await {
            tracing::warn!(call_id = %call_id, error = %e, "Transport close failed");
        }

        let final_state = if failed && self.state() != CallState::Active {
            CallState::Failed
        } else {
            CallState::Terminated
        };
        self.force_state(final_state);
        let _ = self.events.send(CallSessionEvent::Ended { state: final_state });

        tracing::info!(
            call_id = %call_id,
            state = %final_state,
            duration_secs = self.started.elapsed().as_secs(),
            frames_sent = self.source.frames_produced(),
            frames_received = self.inbound_frames(),
            "Call ended"
        );
    }
}
