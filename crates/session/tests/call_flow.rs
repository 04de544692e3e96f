//! Integration tests for call setup, media gating and teardown
//!
//! The transport engine, signaling gateway and ASR engine are replaced by
//! in-memory fakes that record how they were driven.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use voice_call_core::{
    AsrError, ConnectionState, FrameProducer, IceGatheringState, InboundAudioTrack,
    SignalingError, SignalingGateway, SpeechToText, Transcript, TransportEngine, TransportError,
    TransportEvent, TransportFactory, TransportStats,
};
use voice_call_session::{
    AudioClip, CallDeps, CallError, CallEvent, CallEventRouter, CallInfo, CallRegistry,
    CallSession, CallSessionConfig, CallSessionEvent, CallState, SignalingStep,
};

const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

const ANSWER: &str = "v=0\n\
    o=- 2 2 IN IP4 127.0.0.1\n\
    s=-\n\
    a=fingerprint:sha-256 AA:BB:CC\n\
    a=fingerprint:sha-512 DD:EE\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\n";

const SANITIZED: &str = "v=0\r\n\
    o=- 2 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    a=fingerprint:SHA-256 AA:BB:CC\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeTransport {
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    source: Mutex<Option<Arc<dyn FrameProducer>>>,
    connection: RwLock<ConnectionState>,
    gathering: RwLock<IceGatheringState>,
    reject_offer: bool,
    reject_answer: bool,
    // Never reports gathering or connection progress
    silent: bool,
    inbound_rate: Option<u32>,
    inbound_tx: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
    close_count: AtomicUsize,
}

impl FakeTransport {
    fn new(reject_offer: bool, inbound_rate: Option<u32>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(16);
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            source: Mutex::new(None),
            connection: RwLock::new(ConnectionState::New),
            gathering: RwLock::new(IceGatheringState::New),
            reject_offer,
            reject_answer: false,
            silent: false,
            inbound_rate,
            inbound_tx: Mutex::new(None),
            close_count: AtomicUsize::new(0),
        }
    }

    /// Simulate one tick of the media loop
    fn pull(&self) -> Option<voice_call_core::PcmFrame> {
        self.source.lock().as_ref().map(|s| s.produce())
    }

    fn is_closed(&self) -> bool {
        self.close_count.load(Ordering::SeqCst) > 0
    }

    fn inbound(&self) -> Option<mpsc::Sender<Vec<f32>>> {
        self.inbound_tx.lock().clone()
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

#[async_trait]
impl TransportEngine for FakeTransport {
    fn subscribe(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().take()
    }

    async fn add_audio_source(
        &self,
        source: Arc<dyn FrameProducer>,
    ) -> Result<(), TransportError> {
        *self.source.lock() = Some(source);
        Ok(())
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<(), TransportError> {
        if self.reject_offer || !sdp.starts_with("v=0") {
            return Err(TransportError::Negotiation("malformed offer".into()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<String, TransportError> {
        if self.reject_answer {
            return Err(TransportError::Negotiation("no common codec".into()));
        }

        if !self.silent {
            *self.gathering.write() = IceGatheringState::Complete;
            self.emit(TransportEvent::IceGatheringStateChanged(IceGatheringState::Gathering));
            self.emit(TransportEvent::IceGatheringStateChanged(IceGatheringState::Complete));

            *self.connection.write() = ConnectionState::Connected;
            self.emit(TransportEvent::ConnectionStateChanged(ConnectionState::Connecting));
            self.emit(TransportEvent::ConnectionStateChanged(ConnectionState::Connected));
        }

        if let Some(rate) = self.inbound_rate {
            let (tx, rx) = mpsc::channel(256);
            *self.inbound_tx.lock() = Some(tx);
            self.emit(TransportEvent::InboundTrack(InboundAudioTrack {
                track_id: "remote-audio".into(),
                sample_rate: rate,
                frames: rx,
            }));
        }

        Ok(ANSWER.to_string())
    }

    async fn local_description(&self) -> Option<String> {
        Some(ANSWER.to_string())
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        *self.gathering.read()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    async fn stats(&self) -> Result<TransportStats, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(TransportStats::default())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        *self.connection.write() = ConnectionState::Closed;
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    reject_offer: bool,
    reject_answer: bool,
    silent: bool,
    create_delay: Option<Duration>,
    inbound_rate: Option<u32>,
    created: Mutex<HashMap<String, Arc<FakeTransport>>>,
}

impl FakeFactory {
    fn transport(&self, call_id: &str) -> Option<Arc<FakeTransport>> {
        self.created.lock().get(call_id).cloned()
    }

    fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self, call_id: &str) -> Result<Arc<dyn TransportEngine>, TransportError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let transport = Arc::new(FakeTransport {
            reject_answer: self.reject_answer,
            silent: self.silent,
            ..FakeTransport::new(self.reject_offer, self.inbound_rate)
        });
        self.created
            .lock()
            .insert(call_id.to_string(), transport.clone());
        Ok(transport)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SignalingCall {
    step: &'static str,
    call_id: String,
    sdp: String,
    media_enabled: bool,
}

#[derive(Default)]
struct FakeGateway {
    log: Mutex<Vec<SignalingCall>>,
    fail_pre_accept: bool,
    fail_accept: bool,
    hold_pre_accept: Option<Arc<Notify>>,
    factory: Option<Arc<FakeFactory>>,
}

impl FakeGateway {
    fn record(&self, step: &'static str, call_id: &str, sdp: &str) {
        // Sample outbound audio without advancing an enabled source
        let media_enabled = self
            .factory
            .as_ref()
            .and_then(|f| f.transport(call_id))
            .and_then(|t| t.pull())
            .is_some_and(|frame| !frame.is_silent());

        self.log.lock().push(SignalingCall {
            step,
            call_id: call_id.to_string(),
            sdp: sdp.to_string(),
            media_enabled,
        });
    }

    fn steps(&self, call_id: &str) -> Vec<&'static str> {
        self.log
            .lock()
            .iter()
            .filter(|c| c.call_id == call_id)
            .map(|c| c.step)
            .collect()
    }
}

#[async_trait]
impl SignalingGateway for FakeGateway {
    async fn pre_accept(&self, call_id: &str, sdp: &str) -> Result<(), SignalingError> {
        self.record("pre_accept", call_id, sdp);
        if let Some(hold) = &self.hold_pre_accept {
            hold.notified().await;
        }
        if self.fail_pre_accept {
            return Err(SignalingError::Rejected {
                status: 400,
                body: "bad sdp".into(),
            });
        }
        Ok(())
    }

    async fn accept(&self, call_id: &str, sdp: &str) -> Result<(), SignalingError> {
        self.record("accept", call_id, sdp);
        if self.fail_accept {
            return Err(SignalingError::Transport("connection reset".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeAsr {
    windows: Mutex<Vec<(String, Vec<f32>, u32)>>,
    fail: AtomicBool,
}

impl FakeAsr {
    fn windows_for(&self, call_id: &str) -> Vec<Vec<f32>> {
        self.windows
            .lock()
            .iter()
            .filter(|(id, _, _)| id == call_id)
            .map(|(_, w, _)| w.clone())
            .collect()
    }
}

#[async_trait]
impl SpeechToText for FakeAsr {
    async fn transcribe(
        &self,
        call_id: &str,
        window: &[f32],
        sample_rate: u32,
        _language: Option<&str>,
    ) -> Result<Transcript, AsrError> {
        self.windows
            .lock()
            .push((call_id.to_string(), window.to_vec(), sample_rate));
        if self.fail.load(Ordering::SeqCst) {
            return Err(AsrError::Service {
                status: 503,
                body: "busy".into(),
            });
        }
        Ok(Transcript::new(format!("{} samples", window.len())))
    }

    fn model_name(&self) -> &str {
        "fake"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn clip() -> AudioClip {
    // One second of constant non-zero audio at 48kHz
    AudioClip::from_f32(&vec![0.25; 48_000], 48_000)
}

fn test_config() -> CallSessionConfig {
    let mut config = CallSessionConfig::default();
    config.ice_gather_timeout = Duration::from_millis(200);
    config.connect_timeout = Duration::from_millis(200);
    config.diagnostics_interval = Duration::from_millis(50);
    config.teardown_grace = Duration::from_millis(500);
    config.transcription.window_secs = 0.5;
    config.transcription.hop_secs = 0.05;
    config.transcription.min_buffered_secs = 0.05;
    config.transcription.target_sample_rate = 16_000;
    config
}

fn connect(call_id: &str) -> CallEvent {
    CallEvent::Connect {
        call_id: call_id.to_string(),
        offer_sdp: OFFER.to_string(),
        caller_number: "15551234567".to_string(),
        caller_name: "Test Caller".to_string(),
    }
}

fn terminate(call_id: &str) -> CallEvent {
    CallEvent::Terminate {
        call_id: call_id.to_string(),
        status: Some("completed".to_string()),
        duration_secs: Some(3),
    }
}

struct Harness {
    router: Arc<CallEventRouter>,
    registry: Arc<CallRegistry>,
    factory: Arc<FakeFactory>,
    gateway: Arc<FakeGateway>,
}

fn harness(factory: FakeFactory, gateway: FakeGateway, asr: Option<Arc<FakeAsr>>) -> Harness {
    let factory = Arc::new(factory);
    let gateway = Arc::new(FakeGateway {
        factory: Some(factory.clone()),
        ..gateway
    });
    let registry = Arc::new(CallRegistry::new());

    let mut router = CallEventRouter::new(
        registry.clone(),
        factory.clone(),
        gateway.clone(),
        clip(),
        test_config(),
    );
    if let Some(asr) = asr {
        router = router.with_asr(asr);
    }

    Harness {
        router: Arc::new(router),
        registry,
        factory,
        gateway,
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let result = timeout(Duration::from_secs(3), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Valid offer: one pre-accept then one accept, both with the sanitized
/// answer, and media only after accept
#[tokio::test]
async fn test_connect_reaches_active() {
    let h = harness(FakeFactory::default(), FakeGateway::default(), None);

    h.router.handle(connect("call-a")).await.unwrap();

    let log = h.gateway.log.lock().clone();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].step, "pre_accept");
    assert_eq!(log[1].step, "accept");
    assert_eq!(log[0].sdp, SANITIZED);
    assert_eq!(log[1].sdp, SANITIZED);
    assert!(!log[0].media_enabled);
    assert!(!log[1].media_enabled);

    assert_eq!(h.registry.active_call_ids(), vec!["call-a".to_string()]);
    let session = h.registry.get("call-a").unwrap();
    assert_eq!(session.state(), CallState::Active);
    assert_eq!(session.info().caller_name, "Test Caller");

    let transport = h.factory.transport("call-a").unwrap();
    let frame = transport.pull().unwrap();
    assert!(!frame.is_silent());
    assert!(!transport.is_closed());

    h.router.shutdown().await;
}

/// State events arrive in order and media is enabled after `Accepted`
#[tokio::test]
async fn test_media_enabled_after_accepted() {
    let factory = Arc::new(FakeFactory::default());
    let gateway = Arc::new(FakeGateway::default());
    let registry = CallRegistry::new();

    let transport = factory.create("call-e").await.unwrap();
    let info = CallInfo {
        call_id: "call-e".into(),
        caller_number: "1".into(),
        caller_name: "E".into(),
    };
    let session = Arc::new(CallSession::new(
        info,
        Arc::new(test_config()),
        clip().source(960),
        CallDeps {
            transport,
            signaling: gateway.clone(),
            asr: None,
        },
    ));
    assert!(registry.begin(session.clone()));

    let mut events = session.subscribe();
    session.establish(OFFER, &registry).await.unwrap();

    let mut states = Vec::new();
    let mut media_enabled_after = None;
    while let Ok(event) = events.try_recv() {
        match event {
            CallSessionEvent::StateChanged { new, .. } => states.push(new),
            CallSessionEvent::MediaEnabled => media_enabled_after = states.last().copied(),
            _ => {},
        }
    }

    assert_eq!(
        states,
        vec![
            CallState::OfferSet,
            CallState::AnswerLocal,
            CallState::IceGathering,
            CallState::PreAccepted,
            CallState::Accepted,
            CallState::Active,
        ]
    );
    assert_eq!(media_enabled_after, Some(CallState::Accepted));

    session.teardown(&registry, false).await;
    assert_eq!(session.state(), CallState::Terminated);
}

/// Pre-accept failure: no accept, transport closed, never active
#[tokio::test]
async fn test_pre_accept_failure_cleans_up() {
    let gateway = FakeGateway {
        fail_pre_accept: true,
        ..Default::default()
    };
    let h = harness(FakeFactory::default(), gateway, None);

    let result = h.router.handle(connect("call-b")).await;
    assert!(matches!(
        result,
        Err(CallError::SignalingRejected {
            step: SignalingStep::PreAccept,
            ..
        })
    ));

    assert_eq!(h.gateway.steps("call-b"), vec!["pre_accept"]);
    assert!(h.factory.transport("call-b").unwrap().is_closed());
    assert!(h.registry.active_call_ids().is_empty());
    assert!(h.registry.is_empty());
}

/// Accept failure aborts the same way
#[tokio::test]
async fn test_accept_failure_cleans_up() {
    let gateway = FakeGateway {
        fail_accept: true,
        ..Default::default()
    };
    let h = harness(FakeFactory::default(), gateway, None);

    let result = h.router.handle(connect("call-f")).await;
    assert!(matches!(
        result,
        Err(CallError::SignalingRejected {
            step: SignalingStep::Accept,
            ..
        })
    ));

    assert_eq!(h.gateway.steps("call-f"), vec!["pre_accept", "accept"]);
    let transport = h.factory.transport("call-f").unwrap();
    assert!(transport.is_closed());
    assert!(transport.pull().unwrap().is_silent());
    assert!(h.registry.is_empty());
}

/// Rejected offer never reaches signaling
#[tokio::test]
async fn test_offer_rejected() {
    let factory = FakeFactory {
        reject_offer: true,
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), None);

    let result = h.router.handle(connect("call-r")).await;
    assert!(matches!(result, Err(CallError::NegotiationRejected(_))));
    assert!(h.gateway.steps("call-r").is_empty());
    assert!(h.factory.transport("call-r").unwrap().is_closed());
    assert!(h.registry.is_empty());
}

/// Terminate of a never-created call is a no-op
#[tokio::test]
async fn test_terminate_unknown_call() {
    let h = harness(FakeFactory::default(), FakeGateway::default(), None);
    h.router.handle(connect("call-a")).await.unwrap();

    assert!(h.router.handle(terminate("nope")).await.is_ok());
    assert!(matches!(
        h.router.terminate("nope").await,
        Err(CallError::UnknownCall(_))
    ));
    assert_eq!(h.registry.active_call_ids(), vec!["call-a".to_string()]);

    h.router.shutdown().await;
}

/// Active then terminate: absent afterwards, second terminate is a no-op
#[tokio::test]
async fn test_double_terminate() {
    let h = harness(FakeFactory::default(), FakeGateway::default(), None);
    h.router.handle(connect("call-t")).await.unwrap();
    let session = h.registry.get("call-t").unwrap();

    h.router.handle(terminate("call-t")).await.unwrap();
    assert!(h.registry.get("call-t").is_none());
    assert_eq!(session.state(), CallState::Terminated);

    let transport = h.factory.transport("call-t").unwrap();
    assert!(transport.is_closed());
    assert!(transport.pull().unwrap().is_silent());

    h.router.handle(terminate("call-t")).await.unwrap();
    assert_eq!(transport.close_count.load(Ordering::SeqCst), 1);
}

/// Terminate while setup is blocked in pre-accept still releases everything
#[tokio::test]
async fn test_terminate_during_setup() {
    let hold = Arc::new(Notify::new());
    let gateway = FakeGateway {
        hold_pre_accept: Some(hold.clone()),
        ..Default::default()
    };
    let h = harness(FakeFactory::default(), gateway, None);

    h.router.route(connect("call-s"));

    let gw = h.gateway.clone();
    eventually("pre_accept", move || !gw.steps("call-s").is_empty()).await;
    let session = h.registry.get("call-s").unwrap();
    assert_eq!(session.state(), CallState::IceGathering);

    h.router.handle(terminate("call-s")).await.unwrap();
    hold.notify_waiters();

    assert!(h.registry.get("call-s").is_none());
    assert!(h.factory.transport("call-s").unwrap().is_closed());
    assert_eq!(session.state(), CallState::Terminated);

    // Setup must not resume after the hold is released
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.gateway.steps("call-s"), vec!["pre_accept"]);
    assert!(h.registry.active_call_ids().is_empty());
}

/// A second connect for a live call id is ignored
/// Terminate while the transport is still being created: setup is
/// abandoned and the late transport is closed
#[tokio::test]
async fn test_terminate_while_transport_created() {
    let factory = FakeFactory {
        create_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), None);

    h.router.route(connect("call-early"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.registry.is_reserved("call-early"));

    h.router.handle(terminate("call-early")).await.unwrap();
    assert!(!h.registry.is_reserved("call-early"));

    let factory = h.factory.clone();
    eventually("late transport closed", move || {
        factory.transport("call-early").is_some_and(|t| t.is_closed())
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.gateway.steps("call-early").is_empty());
    assert!(h.registry.active_call_ids().is_empty());
    assert!(h.registry.is_empty());
}

/// A connect racing one that is still creating its transport is a duplicate
#[tokio::test]
async fn test_duplicate_connect_while_transport_created() {
    let factory = FakeFactory {
        create_delay: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), None);

    h.router.route(connect("call-dup"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let result = h.router.handle(connect("call-dup")).await;
    assert!(matches!(result, Err(CallError::AlreadyExists(_))));

    let registry = h.registry.clone();
    eventually("call active", move || registry.is_active("call-dup")).await;
    assert_eq!(h.factory.created_count(), 1);
    assert_eq!(h.gateway.steps("call-dup"), vec!["pre_accept", "accept"]);

    h.router.shutdown().await;
}

/// Neither ICE gathering nor the connection ever report progress: both
/// waits time out and the call still goes active
#[tokio::test]
async fn test_transport_silence_is_best_effort() {
    let factory = FakeFactory {
        silent: true,
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), None);

    let started = std::time::Instant::now();
    h.router.handle(connect("call-q")).await.unwrap();

    // ice_gather_timeout + connect_timeout from test_config
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(h.gateway.steps("call-q"), vec!["pre_accept", "accept"]);

    let session = h.registry.get("call-q").unwrap();
    assert_eq!(session.state(), CallState::Active);
    assert!(session.source().is_enabled());
    assert!(h.registry.is_active("call-q"));

    h.router.shutdown().await;
    assert_eq!(session.state(), CallState::Terminated);
}

/// The engine failing to produce an answer is a negotiation failure
#[tokio::test]
async fn test_answer_rejected() {
    let factory = FakeFactory {
        reject_answer: true,
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), None);

    let result = h.router.handle(connect("call-n")).await;
    assert!(matches!(result, Err(CallError::NegotiationRejected(_))));
    assert!(h.gateway.steps("call-n").is_empty());
    assert!(h.factory.transport("call-n").unwrap().is_closed());
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_duplicate_connect_ignored() {
    let h = harness(FakeFactory::default(), FakeGateway::default(), None);
    h.router.handle(connect("call-d")).await.unwrap();

    let result = h.router.handle(connect("call-d")).await;
    assert!(matches!(result, Err(CallError::AlreadyExists(_))));
    assert_eq!(h.factory.created_count(), 1);
    assert_eq!(h.gateway.steps("call-d"), vec!["pre_accept", "accept"]);
    assert_eq!(h.registry.get("call-d").unwrap().state(), CallState::Active);

    h.router.shutdown().await;
}

/// Unknown event kinds are ignored
#[tokio::test]
async fn test_other_events_ignored() {
    let h = harness(FakeFactory::default(), FakeGateway::default(), None);
    let event = CallEvent::Other {
        call_id: "call-o".into(),
        kind: "ringing".into(),
    };
    assert!(h.router.handle(event).await.is_ok());
    assert_eq!(h.factory.created_count(), 0);
}

/// Two concurrent calls: independent cursors, disjoint ASR windows
#[tokio::test]
async fn test_concurrent_calls_are_independent() {
    let asr = Arc::new(FakeAsr::default());
    let factory = FakeFactory {
        inbound_rate: Some(16_000),
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), Some(asr.clone()));

    let (a, b) = tokio::join!(
        h.router.handle(connect("call-x")),
        h.router.handle(connect("call-y"))
    );
    a.unwrap();
    b.unwrap();

    let mut ids = h.registry.active_call_ids();
    ids.sort();
    assert_eq!(ids, vec!["call-x".to_string(), "call-y".to_string()]);

    let tx = h.factory.transport("call-x").unwrap();
    let ty = h.factory.transport("call-y").unwrap();
    for _ in 0..3 {
        tx.pull();
    }
    ty.pull();
    assert_eq!(h.registry.get("call-x").unwrap().source().cursor(), 2_880);
    assert_eq!(h.registry.get("call-y").unwrap().source().cursor(), 960);

    let fx = tx.inbound().unwrap();
    let fy = ty.inbound().unwrap();
    for _ in 0..10 {
        fx.send(vec![0.25; 320]).await.unwrap();
        fy.send(vec![-0.5; 320]).await.unwrap();
    }

    let seen = asr.clone();
    eventually("windows for both calls", move || {
        !seen.windows_for("call-x").is_empty() && !seen.windows_for("call-y").is_empty()
    })
    .await;

    for window in asr.windows_for("call-x") {
        assert!(window.iter().all(|&s| s == 0.25));
    }
    for window in asr.windows_for("call-y") {
        assert!(window.iter().all(|&s| s == -0.5));
    }
    assert!(asr.windows.lock().iter().all(|(_, _, rate)| *rate == 16_000));

    h.router.shutdown().await;
    assert!(h.registry.is_empty());
}

/// ASR failures are logged and the call continues
#[tokio::test]
async fn test_transcription_failure_is_not_fatal() {
    let asr = Arc::new(FakeAsr::default());
    asr.fail.store(true, Ordering::SeqCst);
    let factory = FakeFactory {
        inbound_rate: Some(16_000),
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), Some(asr.clone()));

    h.router.handle(connect("call-z")).await.unwrap();
    let transport = h.factory.transport("call-z").unwrap();
    let frames = transport.inbound().unwrap();
    for _ in 0..10 {
        frames.send(vec![0.1; 320]).await.unwrap();
    }

    let seen = asr.clone();
    eventually("two failed windows", move || seen.windows_for("call-z").len() >= 2).await;

    let session = h.registry.get("call-z").unwrap();
    assert_eq!(session.state(), CallState::Active);
    assert!(!transport.is_closed());

    h.router.shutdown().await;
}

/// Transcripts are published as session events
#[tokio::test]
async fn test_transcript_events() {
    let asr = Arc::new(FakeAsr::default());
    let factory = FakeFactory {
        inbound_rate: Some(16_000),
        ..Default::default()
    };
    let h = harness(factory, FakeGateway::default(), Some(asr));

    h.router.handle(connect("call-w")).await.unwrap();
    let session = h.registry.get("call-w").unwrap();
    let mut events = session.subscribe();

    let frames = h.factory.transport("call-w").unwrap().inbound().unwrap();
    for _ in 0..10 {
        frames.send(vec![0.1; 320]).await.unwrap();
    }

    let transcript = timeout(Duration::from_secs(3), async {
        loop {
            match events.recv().await {
                Ok(CallSessionEvent::Transcript(t)) => return t,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .unwrap();
    assert!(transcript.text.ends_with("samples"));

    h.router.shutdown().await;
}
