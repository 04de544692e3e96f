//! Opus codec wrappers

use audiopus::coder::{Decoder, Encoder};
use audiopus::packet::Packet;
use audiopus::{Application, Channels, MutSignals, SampleRate};
use parking_lot::Mutex;

use crate::TransportError;

/// Largest Opus packet we will produce
const MAX_PACKET_BYTES: usize = 1500;

/// 120ms at 48kHz, the longest Opus frame
const MAX_DECODED_SAMPLES: usize = 5760;

fn opus_rate(sample_rate: u32) -> Result<SampleRate, TransportError> {
    match sample_rate {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(TransportError::Codec(format!(
            "Unsupported Opus sample rate: {}",
            other
        ))),
    }
}

/// Mono Opus encoder tuned for speech
pub struct OpusEncoder {
    encoder: Mutex<Encoder>,
    sample_rate: u32,
}

impl OpusEncoder {
    pub fn new(sample_rate: u32) -> Result<Self, TransportError> {
        let encoder = Encoder::new(opus_rate(sample_rate)?, Channels::Mono, Application::Voip)
            .map_err(|e| TransportError::Codec(format!("Failed to create Opus encoder: {}", e)))?;

        Ok(Self {
            encoder: Mutex::new(encoder),
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Encode one frame; `pcm` must be a valid Opus frame length
    pub fn encode(&self, pcm: &[i16]) -> Result<Vec<u8>, TransportError> {
        let mut output = vec![0u8; MAX_PACKET_BYTES];
        let len = self
            .encoder
            .lock()
            .encode(pcm, &mut output)
            .map_err(|e| TransportError::Codec(format!("Opus encode failed: {}", e)))?;
        output.truncate(len);
        Ok(output)
    }
}

/// Mono Opus decoder
pub struct OpusDecoder {
    decoder: Mutex<Decoder>,
    sample_rate: u32,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> Result<Self, TransportError> {
        let decoder = Decoder::new(opus_rate(sample_rate)?, Channels::Mono)
            .map_err(|e| TransportError::Codec(format!("Failed to create Opus decoder: {}", e)))?;

        Ok(Self {
            decoder: Mutex::new(decoder),
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode one packet to PCM16
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<i16>, TransportError> {
        let mut output = vec![0i16; MAX_DECODED_SAMPLES];

        let packet = Packet::try_from(payload)
            .map_err(|e| TransportError::Codec(format!("Invalid Opus packet: {}", e)))?;
        let signals = MutSignals::try_from(output.as_mut_slice())
            .map_err(|e| TransportError::Codec(format!("Invalid output buffer: {}", e)))?;

        let decoded = self
            .decoder
            .lock()
            .decode(Some(packet), signals, false)
            .map_err(|e| TransportError::Codec(format!("Opus decode failed: {}", e)))?;

        output.truncate(decoded);
        Ok(output)
    }

    /// Packet loss concealment for one missing packet
    pub fn decode_plc(&self, frame_size: usize) -> Result<Vec<i16>, TransportError> {
        let mut output = vec![0i16; frame_size.min(MAX_DECODED_SAMPLES)];

        let signals = MutSignals::try_from(output.as_mut_slice())
            .map_err(|e| TransportError::Codec(format!("Invalid output buffer: {}", e)))?;

        let decoded = self
            .decoder
            .lock()
            .decode(None::<Packet<'_>>, signals, false)
            .map_err(|e| TransportError::Codec(format!("Opus PLC failed: {}", e)))?;

        output.truncate(decoded);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_rate() {
        assert!(OpusEncoder::new(44_100).is_err());
        assert!(OpusDecoder::new(22_050).is_err());
    }

    #[test]
    fn test_encode_decode_frame() {
        let encoder = OpusEncoder::new(48_000).unwrap();
        let decoder = OpusDecoder::new(48_000).unwrap();

        let pcm: Vec<i16> = (0..960)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();

        let packet = encoder.encode(&pcm).unwrap();
        assert!(!packet.is_empty());

        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.len(), 960);
    }

    #[test]
    fn test_invalid_frame_length() {
        let encoder = OpusEncoder::new(48_000).unwrap();
        assert!(encoder.encode(&[0i16; 100]).is_err());
    }
}
