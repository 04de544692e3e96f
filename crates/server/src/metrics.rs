//! Prometheus metrics

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;
use crate::ServerError;

/// Install the global Prometheus recorder and describe the call metrics
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Startup(format!("metrics recorder: {}", e)))?;

    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!("voice_call_connected_total", "Calls that reached active");
    metrics::describe_counter!(
        "voice_call_setup_failures_total",
        "Call setups that failed, by reason"
    );
    metrics::describe_counter!(
        "voice_call_duplicate_connects_total",
        "Connect events ignored because the call already exists"
    );
    metrics::describe_counter!(
        "voice_call_transcription_failures_total",
        "Transcription windows the ASR engine failed on"
    );
    metrics::describe_counter!(
        "voice_call_media_stalls_total",
        "Diagnostics ticks where outbound bytes did not grow"
    );
    metrics::describe_counter!("voice_call_webhook_events_total", "Call events received, by kind");
    metrics::describe_gauge!("voice_call_active_calls", "Calls currently active");
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            "metrics disabled\n".to_string(),
        ),
    }
}
