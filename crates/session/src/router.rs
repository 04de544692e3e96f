//! Dispatch of platform call events

use std::sync::Arc;

use voice_call_core::{SignalingGateway, SpeechToText, TransportFactory};

use crate::call::{CallDeps, CallInfo, CallSession, CallSessionConfig};
use crate::clip::AudioClip;
use crate::error::CallError;
use crate::events::CallEvent;
use crate::registry::CallRegistry;

/// Routes `connect`/`terminate` events to sessions
///
/// `route` never blocks the caller: each event is handled on its own task so
/// a slow setup cannot delay a terminate for another call.
pub struct CallEventRouter {
    registry: Arc<CallRegistry>,
    transports: Arc<dyn TransportFactory>,
    signaling: Arc<dyn SignalingGateway>,
    asr: Option<Arc<dyn SpeechToText>>,
    clip: AudioClip,
    config: Arc<CallSessionConfig>,
}

impl CallEventRouter {
    pub fn new(
        registry: Arc<CallRegistry>,
        transports: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingGateway>,
        clip: AudioClip,
        config: CallSessionConfig,
    ) -> Self {
        Self {
            registry,
            transports,
            signaling,
            asr: None,
            clip,
            config: Arc::new(config),
        }
    }

    /// Transcribe caller audio with `asr`
    pub fn with_asr(mut self, asr: Arc<dyn SpeechToText>) -> Self {
        self.asr = Some(asr);
        self
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        &self.registry
    }

    /// Handle `event` in the background
    pub fn route(self: &Arc<Self>, event: CallEvent) {
        let router = self.clone();
        tokio::spawn(async move {
            let call_id = event.call_id().to_string();
            if let Err(e) = router.handle(event).await {
                if e.is_fatal() {
                    tracing::warn!(call_id = %call_id, error = %e, "Call event failed");
                } else {
                    tracing::info!(call_id = %call_id, error = %e, "Call event not applied");
                }
            }
        });
    }

    /// Handle `event` to completion
    pub async fn handle(&self, event: CallEvent) -> Result<(), CallError> {
        match event {
            CallEvent::Connect {
                call_id,
                offer_sdp,
                caller_number,
                caller_name,
            } => {
                let info = CallInfo {
                    call_id,
                    caller_number,
                    caller_name,
                };
                self.connect(info, &offer_sdp).await
            },
            CallEvent::Terminate {
                call_id,
                status,
                duration_secs,
            } => {
                tracing::info!(
                    call_id = %call_id,
                    status = status.as_deref().unwrap_or("unknown"),
                    duration_secs = duration_secs.unwrap_or(0),
                    "Call terminated by platform"
                );
                match self.terminate(&call_id).await {
                    Err(CallError::UnknownCall(_)) => {
                        tracing::debug!(call_id = %call_id, "Terminate for unknown call ignored");
                        Ok(())
                    },
                    other => other,
                }
            },
            CallEvent::Other { call_id, kind } => {
                tracing::debug!(call_id = %call_id, kind = %kind, "Ignoring call event");
                Ok(())
            },
        }
    }

    /// Set up a call and drive it to `Active`
    ///
    /// A connect for a call id that already has a session is ignored.
    pub async fn connect(&self, info: CallInfo, offer_sdp: &str) -> Result<(), CallError> {
        let call_id = info.call_id.clone();

        // Reserve before the first await so an early terminate can find the call
        let Some(token) = self.registry.reserve(&call_id) else {
            metrics::counter!("voice_call_duplicate_connects_total").increment(1);
            return Err(CallError::AlreadyExists(call_id));
        };

        tracing::info!(
            call_id = %call_id,
            caller = %info.caller_number,
            name = %info.caller_name,
            "Incoming call"
        );

        let transport = match self.transports.create(&call_id).await {
            Ok(t) => t,
            Err(e) => {
                self.registry.cancel_reservation(&call_id);
                metrics::counter!("voice_call_setup_failures_total", "reason" => "transport").increment(1);
                return Err(CallError::Transport(e));
            },
        };

        let source = self.clip.source(self.config.frame_size);
        let deps = CallDeps {
            transport: transport.clone(),
            signaling: self.signaling.clone(),
            asr: self.asr.clone(),
        };
        let session = Arc::new(CallSession::new(info, self.config.clone(), source, deps));

        if !self.registry.claim(session.clone(), token) {
            // Terminated while the transport was being created
            tracing::info!(call_id = %call_id, "Call terminated before setup started");
            if let Err(e) = transport.close().await {
                tracing::debug!(call_id = %call_id, error = %e, "Closing unused transport failed");
            }
            return Err(CallError::Cancelled);
        }

        match session.establish(offer_sdp, &self.registry).await {
            Ok(()) => {
                metrics::counter!("voice_call_connected_total").increment(1);
                self.update_gauge();
                Ok(())
            },
            Err(e) => {
                metrics::counter!("voice_call_setup_failures_total", "reason" => e.reason())
                    .increment(1);
                session.teardown(&self.registry, e.is_fatal()).await;
                self.update_gauge();
                Err(e)
            },
        }
    }

    /// Tear down the session for `call_id`
    pub async fn terminate(&self, call_id: &str) -> Result<(), CallError> {
        let Some(session) = self.registry.remove(call_id) else {
            if self.registry.cancel_reservation(call_id) {
                tracing::debug!(call_id = %call_id, "Cancelled call awaiting its transport");
                return Ok(());
            }
            return Err(CallError::UnknownCall(call_id.to_string()));
        };

        session.teardown(&self.registry, false).await;
        self.update_gauge();
        Ok(())
    }

    /// Tear down every call, pending or active
    pub async fn shutdown(&self) {
        let reserved = self.registry.cancel_reservations();
        let sessions = self.registry.sessions();
        tracing::info!(calls = sessions.len(), reserved, "Terminating all calls");

        for session in sessions {
            self.registry.remove_if(session.call_id(), session.uid());
            session.teardown(&self.registry, false).await;
        }
        self.update_gauge();
    }

    fn update_gauge(&self) {
        metrics::gauge!("voice_call_active_calls").set(self.registry.active_count() as f64);
    }
}
