//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{audio, call, endpoints, transcription};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Calling platform API and webhook credentials
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Outbound media
    #[serde(default)]
    pub media: MediaConfig,

    /// Per-call setup timing
    #[serde(default)]
    pub call: CallConfig,

    /// Inbound transcription
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// STUN/TURN servers
    #[serde(default)]
    pub ice: IceConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_signaling()?;
        self.validate_media()?;
        self.validate_call()?;
        self.validate_transcription()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if !self.server.webhook_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "server.webhook_path".to_string(),
                message: format!("Must start with '/', got {}", self.server.webhook_path),
            });
        }

        Ok(())
    }

    fn validate_signaling(&self) -> Result<(), ConfigError> {
        if self.signaling.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "signaling.request_timeout_secs".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if self.environment.is_strict() {
            if self.signaling.access_token.is_empty() {
                return Err(ConfigError::MissingField("signaling.access_token".to_string()));
            }
            if self.signaling.verify_token.is_empty() {
                return Err(ConfigError::MissingField("signaling.verify_token".to_string()));
            }
            if self.signaling.phone_number_id.is_empty() {
                return Err(ConfigError::MissingField(
                    "signaling.phone_number_id".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn validate_media(&self) -> Result<(), ConfigError> {
        let media = &self.media;

        if ![8_000, 12_000, 16_000, 24_000, 48_000].contains(&media.sample_rate) {
            return Err(ConfigError::InvalidValue {
                field: "media.sample_rate".to_string(),
                message: format!("Not an Opus sample rate: {}", media.sample_rate),
            });
        }

        if ![10, 20, 40, 60].contains(&media.frame_ms) {
            return Err(ConfigError::InvalidValue {
                field: "media.frame_ms".to_string(),
                message: format!("Must be one of 10, 20, 40, 60; got {}", media.frame_ms),
            });
        }

        Ok(())
    }

    fn validate_call(&self) -> Result<(), ConfigError> {
        if self.call.diagnostics_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "call.diagnostics_interval_ms".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        Ok(())
    }

    fn validate_transcription(&self) -> Result<(), ConfigError> {
        let t = &self.transcription;

        // Also rejects NaN
        if !(t.hop_secs > 0.0) || !t.hop_secs.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "transcription.hop_secs".to_string(),
                message: format!("Must be positive, got {}", t.hop_secs),
            });
        }

        if t.min_buffered_secs > t.window_secs {
            return Err(ConfigError::InvalidValue {
                field: "transcription.min_buffered_secs".to_string(),
                message: format!(
                    "Cannot exceed window_secs ({} > {})",
                    t.min_buffered_secs, t.window_secs
                ),
            });
        }

        if t.window_secs > t.max_buffered_secs {
            return Err(ConfigError::InvalidValue {
                field: "transcription.window_secs".to_string(),
                message: format!(
                    "Cannot exceed max_buffered_secs ({} > {})",
                    t.window_secs, t.max_buffered_secs
                ),
            });
        }

        if t.target_sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transcription.target_sample_rate".to_string(),
                message: "Cannot be 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path the calling platform delivers webhooks to
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_webhook_path() -> String {
    "/webhook".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_path: default_webhook_path(),
            timeout_seconds: default_timeout(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Calling platform credentials and endpoints
///
/// Secrets belong in the environment, e.g.
/// `VOICE_CALL__SIGNALING__ACCESS_TOKEN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,

    #[serde(default = "default_graph_api_version")]
    pub api_version: String,

    /// Business phone number id used in the calls endpoint path
    #[serde(default)]
    pub phone_number_id: String,

    /// Human readable phone number, reported by the status endpoint
    #[serde(default)]
    pub phone_number: String,

    #[serde(default)]
    pub access_token: String,

    /// Token the platform echoes during webhook verification
    #[serde(default)]
    pub verify_token: String,

    #[serde(default = "default_signaling_timeout")]
    pub request_timeout_secs: u64,
}

fn default_graph_api_base() -> String {
    endpoints::GRAPH_API_BASE.to_string()
}
fn default_graph_api_version() -> String {
    endpoints::GRAPH_API_VERSION.to_string()
}
fn default_signaling_timeout() -> u64 {
    endpoints::SIGNALING_TIMEOUT_SECS
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            graph_api_base: default_graph_api_base(),
            api_version: default_graph_api_version(),
            phone_number_id: String::new(),
            phone_number: String::new(),
            access_token: String::new(),
            verify_token: String::new(),
            request_timeout_secs: default_signaling_timeout(),
        }
    }
}

impl SignalingConfig {
    /// `{base}/{version}/{phone_number_id}/calls`
    pub fn calls_url(&self) -> String {
        format!(
            "{}/{}/{}/calls",
            self.graph_api_base.trim_end_matches('/'),
            self.api_version,
            self.phone_number_id
        )
    }
}

/// Outbound media configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// WAV clip looped to every caller
    #[serde(default = "default_audio_file")]
    pub audio_file: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,
}

fn default_audio_file() -> String {
    "assets/music.wav".to_string()
}
fn default_sample_rate() -> u32 {
    audio::PLAYBACK_SAMPLE_RATE
}
fn default_frame_ms() -> u32 {
    audio::FRAME_DURATION_MS
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio_file: default_audio_file(),
            sample_rate: default_sample_rate(),
            frame_ms: default_frame_ms(),
        }
    }
}

impl MediaConfig {
    /// Samples in one frame at the configured rate
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Per-call setup timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    #[serde(default = "default_ice_gather_timeout")]
    pub ice_gather_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_diagnostics_interval")]
    pub diagnostics_interval_ms: u64,

    #[serde(default = "default_teardown_grace")]
    pub teardown_grace_ms: u64,
}

fn default_ice_gather_timeout() -> u64 {
    call::ICE_GATHER_TIMEOUT_MS
}
fn default_connect_timeout() -> u64 {
    call::CONNECT_TIMEOUT_MS
}
fn default_diagnostics_interval() -> u64 {
    call::DIAGNOSTICS_INTERVAL_MS
}
fn default_teardown_grace() -> u64 {
    call::TEARDOWN_GRACE_MS
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_gather_timeout_ms: default_ice_gather_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            diagnostics_interval_ms: default_diagnostics_interval(),
            teardown_grace_ms: default_teardown_grace(),
        }
    }
}

/// Inbound transcription configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// When false, inbound audio is drained and counted only
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the ASR service
    #[serde(default = "default_asr_url")]
    pub url: String,

    /// Language hint; None lets the engine detect it
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default = "default_window_secs")]
    pub window_secs: f32,

    #[serde(default = "default_hop_secs")]
    pub hop_secs: f32,

    #[serde(default = "default_min_buffered_secs")]
    pub min_buffered_secs: f32,

    #[serde(default = "default_max_buffered_secs")]
    pub max_buffered_secs: f32,

    #[serde(default = "default_target_sample_rate")]
    pub target_sample_rate: u32,

    #[serde(default = "default_asr_timeout")]
    pub request_timeout_ms: u64,
}

fn default_asr_url() -> String {
    endpoints::ASR_DEFAULT.to_string()
}
fn default_window_secs() -> f32 {
    transcription::WINDOW_SECS
}
fn default_hop_secs() -> f32 {
    transcription::HOP_SECS
}
fn default_min_buffered_secs() -> f32 {
    transcription::MIN_BUFFERED_SECS
}
fn default_max_buffered_secs() -> f32 {
    transcription::MAX_BUFFERED_SECS
}
fn default_target_sample_rate() -> u32 {
    audio::ANALYSIS_SAMPLE_RATE
}
fn default_asr_timeout() -> u64 {
    transcription::REQUEST_TIMEOUT_MS
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_asr_url(),
            language: None,
            window_secs: default_window_secs(),
            hop_secs: default_hop_secs(),
            min_buffered_secs: default_min_buffered_secs(),
            max_buffered_secs: default_max_buffered_secs(),
            target_sample_rate: default_target_sample_rate(),
            request_timeout_ms: default_asr_timeout(),
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN servers for NAT traversal
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,

    /// TURN servers for relay when STUN fails
    #[serde(default)]
    pub turn_servers: Vec<TurnServerConfig>,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (e.g., "turn:turn.example.com:3478")
    pub url: String,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

fn default_stun_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            turn_servers: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable the Prometheus recorder and /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::with_name("config/default").required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VOICE_CALL")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
