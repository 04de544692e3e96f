//! PCM frame types, sample conversion and resampling

use rubato::{FftFixedIn, Resampler};

/// PCM16 normalization constant (i16 -> f32)
pub const PCM16_NORMALIZE: f32 = 32768.0;

/// PCM16 scaling constant (f32 -> i16), applied after clamping to [-1, 1]
pub const PCM16_SCALE: f32 = 32767.0;

/// One fixed-duration frame of mono PCM16 audio
#[derive(Clone, PartialEq, Eq)]
pub struct PcmFrame {
    pub samples: Vec<i16>,
    /// Presentation timestamp in samples
    pub pts: u64,
}

impl std::fmt::Debug for PcmFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmFrame")
            .field("samples", &self.samples.len())
            .field("pts", &self.pts)
            .finish()
    }
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>, pts: u64) -> Self {
        Self { samples, pts }
    }

    /// All-zero frame with timestamp 0
    pub fn silence(frame_size: usize) -> Self {
        Self {
            samples: vec![0; frame_size],
            pts: 0,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Clip to [-1, 1] and scale to i16
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM16_NORMALIZE
}

pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s)).collect()
}

pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| i16_to_f32(s)).collect()
}

/// Little-endian PCM16 bytes, as expected by HTTP ASR services
pub fn to_pcm16_le_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
        .collect()
}

/// Average interleaved channels down to mono
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample a complete buffer
///
/// Uses Rubato's FFT resampler in fixed-size chunks; falls back to linear
/// interpolation for very short inputs or if Rubato rejects the ratio.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    const CHUNK: usize = 1024;

    if samples.len() < 64 {
        return resample_linear(samples, from_rate, to_rate);
    }

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;

    let mut resampler =
        match FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK, 2, 1) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Rubato init failed, using linear fallback: {}", e);
                return resample_linear(samples, from_rate, to_rate);
            },
        };

    let mut output = Vec::with_capacity(expected + CHUNK);
    for chunk in samples.chunks(CHUNK) {
        let result = if chunk.len() == CHUNK {
            resampler.process(&[chunk], None)
        } else {
            resampler.process_partial(Some(&[chunk][..]), None)
        };

        match result {
            Ok(out) => output.extend(out.into_iter().next().unwrap_or_default()),
            Err(e) => {
                tracing::warn!("Rubato processing failed, using linear fallback: {}", e);
                return resample_linear(samples, from_rate, to_rate);
            },
        }
    }

    output.resize(expected, 0.0);
    output
}

/// Linear interpolation fallback for edge cases
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let last = samples.len() - 1;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = (src_idx.floor() as usize).min(last);
        let idx_ceil = (idx_floor + 1).min(last);
        let frac = (src_idx - idx_floor as f64) as f32;

        resampled.push(samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac);
    }

    resampled
}

/// Stateful resampler for audio arriving in small frames
///
/// Input is buffered until Rubato's fixed chunk size is available, so the
/// filter state carries across frame boundaries.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let inner = if from_rate == to_rate {
            None
        } else {
            // 10ms chunks at the input rate
            let chunk = (from_rate as usize / 100).max(64);
            match FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, chunk, 2, 1) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!("Rubato init failed, using linear fallback: {}", e);
                    None
                },
            }
        };

        Self {
            from_rate,
            to_rate,
            inner,
            pending: Vec::new(),
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Feed input samples and return whatever output is ready
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }

        let Some(resampler) = self.inner.as_mut() else {
            return resample_linear(input, self.from_rate, self.to_rate);
        };

        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk], None) {
                Ok(out) => output.extend(out.into_iter().next().unwrap_or_default()),
                Err(e) => {
                    tracing::warn!("Resampling error: {}", e);
                },
            }
        }

        output
    }

    /// Drop buffered input and filter state
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(r) = self.inner.as_mut() {
            r.reset();
        }
    }
}
