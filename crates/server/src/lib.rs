//! Voice Call Server
//!
//! Receives call webhooks from the WhatsApp Business platform and drives the
//! call sessions behind them. Also hosts the signaling and ASR HTTP clients.

pub mod asr;
pub mod http;
pub mod metrics;
pub mod signaling;
pub mod state;
pub mod webhook;

pub use asr::{HttpSpeechToText, HttpSttConfig};
pub use http::create_router;
pub use metrics::{init_metrics, metrics_handler};
pub use signaling::GraphApiGateway;
pub use state::AppState;
pub use webhook::{parse_call_events, WebhookPayload};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Webhook verification failed")]
    Forbidden,

    #[error("Startup failed: {0}")]
    Startup(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Forbidden => axum::http::StatusCode::FORBIDDEN,
            ServerError::Startup(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
