//! Inbound audio buffering and windowed transcription

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use voice_call_config::TranscriptionConfig;
use voice_call_core::{SpeechToText, StreamResampler, Transcript};

/// Accumulator sizing
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Rate of incoming samples
    pub source_rate: u32,
    /// Rate handed to the ASR engine
    pub target_rate: u32,
    pub window_secs: f32,
    pub hop_secs: f32,
    pub min_buffered_secs: f32,
    pub max_buffered_secs: f32,
}

impl AccumulatorConfig {
    pub fn from_transcription(config: &TranscriptionConfig, source_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate: config.target_sample_rate,
            window_secs: config.window_secs,
            hop_secs: config.hop_secs,
            min_buffered_secs: config.min_buffered_secs,
            max_buffered_secs: config.max_buffered_secs,
        }
    }

    pub fn hop(&self) -> Duration {
        Duration::from_secs_f32(self.hop_secs)
    }

    fn samples(&self, secs: f32) -> usize {
        (secs * self.target_rate as f32).round() as usize
    }
}

/// Sliding buffer of caller audio at the analysis rate
pub struct InboundAudioAccumulator {
    config: AccumulatorConfig,
    resampler: StreamResampler,
    buffer: Vec<f32>,
    running: bool,
}

/// Shared between the inbound reader and the flush loop; never held across
/// an await
pub type SharedAccumulator = Arc<Mutex<InboundAudioAccumulator>>;

impl InboundAudioAccumulator {
    pub fn new(config: AccumulatorConfig) -> Self {
        let resampler = StreamResampler::new(config.source_rate, config.target_rate);
        Self {
            config,
            resampler,
            buffer: Vec::new(),
            running: true,
        }
    }

    pub fn shared(config: AccumulatorConfig) -> SharedAccumulator {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn config(&self) -> &AccumulatorConfig {
        &self.config
    }

    /// Resample and append; no-op once stopped
    pub fn append(&mut self, samples: &[f32]) {
        if !self.running {
            return;
        }

        let resampled = self.resampler.process(samples);
        self.buffer.extend_from_slice(&resampled);

        let max = self.config.samples(self.config.max_buffered_secs);
        if self.buffer.len() > max {
            let excess = self.buffer.len() - max;
            self.buffer.drain(..excess);
        }
    }

    /// Trailing window, or empty while less than the minimum is buffered
    pub fn flush(&self) -> Vec<f32> {
        let min = self.config.samples(self.config.min_buffered_secs);
        if self.buffer.is_empty() || self.buffer.len() < min {
            return Vec::new();
        }

        let window = self.config.samples(self.config.window_secs);
        let start = self.buffer.len().saturating_sub(window);
        self.buffer[start..].to_vec()
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.buffer.clear();
        self.resampler.reset();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered_secs(&self) -> f32 {
        self.buffer.len() as f32 / self.config.target_rate as f32
    }
}

/// Hand the trailing window to the ASR engine every hop until cancelled
///
/// Per-window failures are logged and counted; they never end the loop.
pub async fn run_transcription_loop<F>(
    call_id: String,
    accumulator: SharedAccumulator,
    asr: Arc<dyn SpeechToText>,
    language: Option<String>,
    cancel: CancellationToken,
    on_transcript: F,
) where
    F: Fn(Transcript) + Send + 'static,
{
    let (hop, rate) = {
        let acc = accumulator.lock();
        (acc.config().hop(), acc.config().target_rate)
    };

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + hop, hop);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::debug!(call_id = %call_id, hop_ms = hop.as_millis() as u64, model = asr.model_name(), "Transcription loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let window = {
            let acc = accumulator.lock();
            if !acc.is_running() {
                break;
            }
            acc.flush()
        };

        if window.is_empty() {
            continue;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = asr.transcribe(&call_id, &window, rate, language.as_deref()) => r,
        };

        match result {
            Ok(transcript) => {
                if transcript.is_empty() {
                    continue;
                }
                tracing::info!(
                    call_id = %call_id,
                    text = %transcript.text,
                    language = transcript.language.as_deref().unwrap_or("auto"),
                    "Transcript"
                );
                on_transcript(transcript);
            },
            Err(e) => {
                metrics::counter!("voice_call_transcription_failures_total").increment(1);
                tracing::warn!(call_id = %call_id, error = %e, "Transcription failed for window");
            },
        }
    }

    tracing::debug!(call_id = %call_id, "Transcription loop stopped");
}
