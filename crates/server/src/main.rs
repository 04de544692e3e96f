//! Voice Call Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_call_config::{load_settings, Settings};
use voice_call_server::{
    create_router, init_metrics, AppState, GraphApiGateway, HttpSpeechToText, HttpSttConfig,
};
use voice_call_session::{AudioClip, CallEventRouter, CallRegistry, CallSessionConfig};
use voice_call_transport::{WebRtcConfig, WebRtcTransportFactory};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("VOICE_CALL_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return Err(e.into());
        },
    };

    init_tracing(&config);

    tracing::info!("Starting Voice Call Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?config.environment,
        phone_number = %config.signaling.phone_number,
        "Configuration loaded"
    );

    let metrics_handle = if config.observability.metrics_enabled {
        let handle = init_metrics()?;
        tracing::info!("Initialized Prometheus metrics at /metrics");
        Some(handle)
    } else {
        None
    };

    // Shared by every call; each call gets its own cursor
    let clip = AudioClip::load_wav(&config.media.audio_file, config.media.sample_rate)?;
    tracing::info!(
        path = %config.media.audio_file,
        duration_secs = clip.duration_secs(),
        "Loaded outbound audio clip"
    );

    let transports = Arc::new(WebRtcTransportFactory::new(WebRtcConfig::from(&config)));
    let signaling = Arc::new(GraphApiGateway::new(&config.signaling)?);

    let mut router = CallEventRouter::new(
        Arc::new(CallRegistry::new()),
        transports,
        signaling,
        clip,
        CallSessionConfig::from(&config),
    );

    if config.transcription.enabled {
        let asr = HttpSpeechToText::new(HttpSttConfig::from(&config.transcription))?;
        router = router.with_asr(Arc::new(asr));
        tracing::info!(
            url = %config.transcription.url,
            language = config.transcription.language.as_deref().unwrap_or("auto"),
            "Transcription enabled"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let mut state = AppState::new(config, router);
    if let Some(handle) = metrics_handle {
        state = state.with_metrics(handle);
    }
    let calls = state.router.clone();
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release every live call before exiting
    calls.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("voice_call={},tower_http=debug", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
