//! HTTP ASR client
//!
//! Sends each transcription window to an external speech service as raw
//! PCM16 little-endian audio and reads back a JSON transcript.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use voice_call_config::TranscriptionConfig;
use voice_call_core::{audio::to_pcm16_le_bytes, AsrError, SpeechToText, Transcript};

use crate::ServerError;

/// HTTP STT backend configuration
#[derive(Debug, Clone)]
pub struct HttpSttConfig {
    /// Base URL of the speech service
    pub url: String,
    pub timeout_ms: u64,
}

impl From<&TranscriptionConfig> for HttpSttConfig {
    fn from(config: &TranscriptionConfig) -> Self {
        Self {
            url: config.url.clone(),
            timeout_ms: config.request_timeout_ms,
        }
    }
}

/// Response from the speech service
#[derive(Debug, Deserialize)]
struct SttResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpSpeechToText {
    config: HttpSttConfig,
    client: reqwest::Client,
}

impl HttpSpeechToText {
    pub fn new(config: HttpSttConfig) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ServerError::Startup(format!("ASR HTTP client: {}", e)))?;

        tracing::info!(url = %config.url, "HTTP ASR backend configured");
        Ok(Self { config, client })
    }

    fn transcribe_url(&self) -> String {
        format!("{}/transcribe", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(
        &self,
        call_id: &str,
        window: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> Result<Transcript, AsrError> {
        let body = to_pcm16_le_bytes(window);

        let mut request = self
            .client
            .post(self.transcribe_url())
            .header("Content-Type", "audio/pcm")
            .header("X-Sample-Rate", sample_rate.to_string())
            .header("X-Call-Id", call_id);
        if let Some(language) = language {
            request = request.header("X-Language", language);
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                AsrError::Timeout
            } else {
                AsrError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AsrError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let result: SttResponse = response
            .json()
            .await
            .map_err(|e| AsrError::InvalidResponse(e.to_string()))?;

        if let Some(error) = result.error {
            return Err(AsrError::InvalidResponse(error));
        }

        Ok(Transcript {
            text: result.text.trim().to_string(),
            language: result.language,
            confidence: result.confidence,
        })
    }

    fn model_name(&self) -> &str {
        "http"
    }
}
