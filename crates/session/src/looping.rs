//! Looping outbound audio source

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use voice_call_core::audio::f32_to_i16;
use voice_call_core::{FrameProducer, PcmFrame};

/// Endless frame sequence cycling over a preloaded clip
///
/// The clip buffer is shared between calls; each source owns its cursor.
/// While disabled, every frame is silence with timestamp 0 and the cursor
/// does not move.
pub struct LoopingAudioSource {
    samples: Arc<[i16]>,
    sample_rate: u32,
    frame_size: usize,
    cursor: AtomicUsize,
    enabled: AtomicBool,
    frames_produced: AtomicU64,
}

impl LoopingAudioSource {
    pub fn new(samples: Arc<[i16]>, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            samples,
            sample_rate,
            frame_size,
            cursor: AtomicUsize::new(0),
            enabled: AtomicBool::new(false),
            frames_produced: AtomicU64::new(0),
        }
    }

    /// Build from float samples, clipping to [-1, 1] before scaling
    pub fn from_f32(samples: &[f32], sample_rate: u32, frame_size: usize) -> Self {
        let pcm: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        Self::new(pcm.into(), sample_rate, frame_size)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn total_samples(&self) -> usize {
        self.samples.len()
    }

    /// Non-silent frames produced so far
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }
}

impl FrameProducer for LoopingAudioSource {
    fn produce(&self) -> PcmFrame {
        let total = self.samples.len();
        if !self.is_enabled() || total == 0 || self.frame_size == 0 {
            return PcmFrame::silence(self.frame_size);
        }

        // Only the media loop calls produce, so load/store cannot race
        let start = self.cursor.load(Ordering::SeqCst);
        let mut frame = Vec::with_capacity(self.frame_size);
        let mut pos = start;
        while frame.len() < self.frame_size {
            let take = (self.frame_size - frame.len()).min(total - pos);
            frame.extend_from_slice(&self.samples[pos..pos + take]);
            pos = (pos + take) % total;
        }
        self.cursor
            .store((start + self.frame_size) % total, Ordering::SeqCst);

        let n = self.frames_produced.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 500 == 0 {
            tracing::trace!(frames = n, cursor = start, "Looping source progress");
        }

        PcmFrame::new(frame, start as u64)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}
