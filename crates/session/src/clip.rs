//! Audio clip loading

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use voice_call_core::audio::{downmix_to_mono, f32_to_i16, resample};

use crate::looping::LoopingAudioSource;

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("Cannot read audio clip {path}: {message}")]
    Read { path: String, message: String },

    #[error("Unsupported audio format: {0}")]
    Format(String),

    #[error("Audio clip {0} is empty")]
    Empty(String),
}

/// Playback-ready mono PCM16 clip
///
/// Loaded once at startup and shared by every call; cloning is cheap.
#[derive(Clone)]
pub struct AudioClip {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("samples", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl AudioClip {
    /// Read a WAV file, downmix, resample to `sample_rate` and clip
    pub fn load_wav(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, ClipError> {
        let path = path.as_ref();
        let path_name = path.display().to_string();

        let mut reader = hound::WavReader::open(path).map_err(|e| ClipError::Read {
            path: path_name.clone(),
            message: e.to_string(),
        })?;
        let spec = reader.spec();

        let read_err = |e: hound::Error| ClipError::Read {
            path: path_name.clone(),
            message: e.to_string(),
        };

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(read_err)?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(ClipError::Format(format!(
                        "{} bits per sample",
                        spec.bits_per_sample
                    )));
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(read_err)?
            },
        };

        let mono = downmix_to_mono(&interleaved, spec.channels as usize);
        if mono.is_empty() {
            return Err(ClipError::Empty(path_name));
        }

        let resampled = resample(&mono, spec.sample_rate, sample_rate);
        let clip = Self::from_f32(&resampled, sample_rate);

        tracing::info!(
            path = %path_name,
            source_rate = spec.sample_rate,
            channels = spec.channels,
            samples = clip.len(),
            duration_secs = clip.duration_secs(),
            "Loaded audio clip"
        );

        Ok(clip)
    }

    /// Clip to [-1, 1] and scale to i16
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        let pcm: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        Self {
            samples: pcm.into(),
            sample_rate,
        }
    }

    pub fn from_pcm16(samples: Arc<[i16]>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> Arc<[i16]> {
        self.samples.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// New source with its own cursor over the shared samples
    pub fn source(&self, frame_size: usize) -> LoopingAudioSource {
        LoopingAudioSource::new(self.samples.clone(), self.sample_rate, frame_size)
    }
}
