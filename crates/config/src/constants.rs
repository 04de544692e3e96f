//! Centralized constants for the voice call service
//!
//! Single source of truth for timeouts, audio parameters and endpoints used
//! as configuration defaults across the workspace.

/// Audio parameters for the outbound and inbound media paths
pub mod audio {
    /// Opus runs at 48 kHz on the wire
    pub const PLAYBACK_SAMPLE_RATE: u32 = 48_000;

    /// Duration of one outbound frame (milliseconds)
    pub const FRAME_DURATION_MS: u32 = 20;

    /// Samples per outbound frame at the playback rate
    pub const FRAME_SAMPLES: usize = (PLAYBACK_SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize;

    /// Sample rate expected by the ASR service
    pub const ANALYSIS_SAMPLE_RATE: u32 = 16_000;
}

/// Call setup timing
pub mod call {
    /// Upper bound on waiting for ICE gathering to complete
    pub const ICE_GATHER_TIMEOUT_MS: u64 = 3_500;

    /// Upper bound on waiting for the transport to report connected
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Transport statistics polling cadence
    pub const DIAGNOSTICS_INTERVAL_MS: u64 = 1_000;

    /// How long teardown waits for per-call tasks to wind down
    pub const TEARDOWN_GRACE_MS: u64 = 2_000;
}

/// Inbound transcription windowing
pub mod transcription {
    pub const WINDOW_SECS: f32 = 7.0;
    pub const HOP_SECS: f32 = 2.0;
    pub const MIN_BUFFERED_SECS: f32 = 1.0;
    pub const MAX_BUFFERED_SECS: f32 = 30.0;
    pub const REQUEST_TIMEOUT_MS: u64 = 15_000;
}

/// Service endpoints
pub mod endpoints {
    /// Graph API base URL for the calling platform
    pub const GRAPH_API_BASE: &str = "https://graph.facebook.com";

    /// Graph API version segment
    pub const GRAPH_API_VERSION: &str = "v21.0";

    /// Local ASR service
    pub const ASR_DEFAULT: &str = "http://localhost:8090";

    /// Timeout for signaling requests (seconds)
    pub const SIGNALING_TIMEOUT_SECS: u64 = 10;
}

/// WebRTC ICE timing
pub mod webrtc {
    /// ICE disconnected timeout (seconds) - time before considering peer disconnected
    pub const ICE_DISCONNECTED_TIMEOUT_SECS: u64 = 5;

    /// ICE failed timeout (seconds) - time before declaring connection failed
    pub const ICE_FAILED_TIMEOUT_SECS: u64 = 25;

    /// ICE keep-alive interval (seconds)
    pub const ICE_KEEPALIVE_INTERVAL_SECS: u64 = 2;
}
