//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use voice_call_config::Settings;
use voice_call_session::{CallEventRouter, CallRegistry};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Dispatches webhook call events to sessions
    pub router: Arc<CallEventRouter>,
    /// `None` when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(settings: Settings, router: CallEventRouter) -> Self {
        Self {
            settings: Arc::new(settings),
            router: Arc::new(router),
            metrics: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn registry(&self) -> &Arc<CallRegistry> {
        self.router.registry()
    }
}
