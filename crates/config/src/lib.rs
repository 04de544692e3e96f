//! Configuration management for the voice call service
//!
//! Supports loading configuration from:
//! - YAML/TOML/JSON files under `config/`
//! - Environment variables (VOICE_CALL__ prefix, `__` separator)

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, CallConfig, IceConfig, MediaConfig, ObservabilityConfig, RuntimeEnvironment,
    ServerConfig, Settings, SignalingConfig, TranscriptionConfig, TurnServerConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
