//! HTTP Endpoints
//!
//! Webhook receiver plus the operational API.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::webhook::{parse_call_events, VerifyQuery, WebhookPayload};
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.settings.server;
    let cors_layer = build_cors_layer(&server.cors_origins, server.cors_enabled);
    let timeout = Duration::from_secs(server.timeout_seconds);

    Router::new()
        // Platform webhook
        .route(
            &server.webhook_path,
            get(verify_webhook).post(receive_webhook),
        )
        // Operational API
        .route("/api/calls", get(list_calls))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// Disabled CORS is permissive. An empty or fully invalid origin list falls
/// back to localhost.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No usable CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Subscription handshake
async fn verify_webhook(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, StatusCode> {
    match query.verify(&state.settings.signaling.verify_token) {
        Some(challenge) => {
            tracing::info!("Webhook verified");
            Ok(challenge.to_string())
        },
        None => {
            tracing::warn!(mode = ?query.mode, "Webhook verification rejected");
            Err(ServerError::Forbidden.into())
        },
    }
}

/// Call notifications; events are routed without waiting for setup
async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Json<serde_json::Value> {
    if !payload.is_business_account() {
        tracing::debug!(object = %payload.object, "Ignoring webhook for other object");
        return Json(serde_json::json!({ "status": "ok" }));
    }

    for event in parse_call_events(&payload) {
        tracing::debug!(call_id = %event.call_id(), kind = %event.kind(), "Call event received");
        metrics::counter!("voice_call_webhook_events_total", "kind" => event.kind().to_string())
            .increment(1);
        state.router.route(event);
    }

    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct CallSummary {
    call_id: String,
    caller_number: String,
    caller_name: String,
    state: String,
    started_at: DateTime<Utc>,
    uptime_secs: u64,
    inbound_frames: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    buffered_secs: Option<f32>,
}

/// Phone number and active calls
async fn list_calls(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.registry();
    let active = registry.active_call_ids();

    let calls: Vec<CallSummary> = active
        .iter()
        .filter_map(|id| registry.get(id))
        .map(|session| CallSummary {
            call_id: session.call_id().to_string(),
            caller_number: session.info().caller_number.clone(),
            caller_name: session.info().caller_name.clone(),
            state: session.state().to_string(),
            started_at: DateTime::<Utc>::from(session.created_at()),
            uptime_secs: session.uptime().as_secs(),
            inbound_frames: session.inbound_frames(),
            buffered_secs: session.buffered_secs(),
        })
        .collect();

    Json(serde_json::json!({
        "status": "ok",
        "phone_number": state.settings.signaling.phone_number,
        "active_calls": active,
        "pending_calls": registry.pending_count(),
        "calls": calls,
    }))
}

/// Liveness with call counts
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry();
    let uptime = Utc::now().signed_duration_since(state.started_at);

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "active_calls": registry.active_count(),
            "pending_calls": registry.pending_count(),
            "uptime_secs": uptime.num_seconds(),
        })),
    )
}
