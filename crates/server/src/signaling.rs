//! WhatsApp Cloud API call signaling
//!
//! `pre_accept` and `accept` both POST the local answer to the phone
//! number's `calls` endpoint. Only HTTP 200 counts as success.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use voice_call_config::SignalingConfig;
use voice_call_core::{SignalingError, SignalingGateway};

use crate::ServerError;

#[derive(Debug, Serialize)]
struct CallActionRequest<'a> {
    messaging_product: &'static str,
    call_id: &'a str,
    action: &'static str,
    session: AnswerSession<'a>,
}

#[derive(Debug, Serialize)]
struct AnswerSession<'a> {
    sdp_type: &'static str,
    sdp: &'a str,
}

/// Graph API implementation of `SignalingGateway`
pub struct GraphApiGateway {
    client: reqwest::Client,
    calls_url: String,
    access_token: String,
}

impl GraphApiGateway {
    pub fn new(config: &SignalingConfig) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServerError::Startup(format!("signaling HTTP client: {}", e)))?;

        Ok(Self {
            client,
            calls_url: config.calls_url(),
            access_token: config.access_token.clone(),
        })
    }

    pub fn calls_url(&self) -> &str {
        &self.calls_url
    }

    async fn send_action(
        &self,
        action: &'static str,
        call_id: &str,
        sdp: &str,
    ) -> Result<(), SignalingError> {
        let body = CallActionRequest {
            messaging_product: "whatsapp",
            call_id,
            action,
            session: AnswerSession {
                sdp_type: "answer",
                sdp,
            },
        };

        tracing::debug!(call_id = %call_id, action, sdp_bytes = sdp.len(), "Sending call action");

        let response = self
            .client
            .post(&self.calls_url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(call_id = %call_id, action, status = status.as_u16(), body = %body, "Call action rejected");
            return Err(SignalingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(call_id = %call_id, action, "Call action accepted");
        Ok(())
    }
}

#[async_trait]
impl SignalingGateway for GraphApiGateway {
    async fn pre_accept(&self, call_id: &str, sdp: &str) -> Result<(), SignalingError> {
        self.send_action("pre_accept", call_id, sdp).await
    }

    async fn accept(&self, call_id: &str, sdp: &str) -> Result<(), SignalingError> {
        self.send_action("accept", call_id, sdp).await
    }
}
