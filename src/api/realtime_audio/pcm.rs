//! PCM16 framing and the small resampling helpers used by capture.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::PcmError;

/// Capture rate expected by the live model
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of the model's audio replies
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// One outbound block of base64 PCM16.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrame {
    pub data: String,
    pub mime_type: String,
}

/// Float samples to PCM16 little-endian. Out-of-range input is clamped, and
/// `1.0` saturates to `i16::MAX`.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // float-to-int `as` truncates toward zero and saturates
        let value = (sample.clamp(-1.0, 1.0) * 32768.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn encode_frame(samples: &[f32]) -> AudioFrame {
    AudioFrame {
        data: general_purpose::STANDARD.encode(encode_pcm16(samples)),
        mime_type: INPUT_MIME_TYPE.to_string(),
    }
}

pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, PcmError> {
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

pub fn decode_frame_base64(data: &str) -> Result<Vec<f32>, PcmError> {
    let bytes = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| PcmError::Base64(e.to_string()))?;
    decode_pcm16(&bytes)
}

/// Playback length of `sample_count` samples at `rate`, in seconds.
pub fn duration_secs(sample_count: usize, rate: u32) -> f64 {
    sample_count as f64 / rate as f64
}

/// Average interleaved channels down to mono.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Nearest-neighbour rate converter for a continuous stream.
///
/// Output sample `j` takes source sample `floor(j * source / target)` on the
/// whole stream's timeline, so chunk boundaries never drop the fractional part.
#[derive(Debug, Clone)]
pub struct Resampler {
    source_rate: u64,
    target_rate: u64,
    /// Source samples seen so far
    consumed: u64,
    /// Output samples emitted so far
    produced: u64,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate: source_rate as u64,
            target_rate: target_rate as u64,
            consumed: 0,
            produced: 0,
        }
    }

    fn is_passthrough(&self) -> bool {
        self.source_rate == self.target_rate || self.source_rate == 0 || self.target_rate == 0
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return samples.to_vec();
        }
        let end = self.consumed + samples.len() as u64;
        let mut out = Vec::with_capacity(
            (samples.len() as u64 * self.target_rate / self.source_rate + 1) as usize,
        );
        loop {
            let source_index = self.produced * self.source_rate / self.target_rate;
            if source_index >= end {
                break;
            }
            out.push(samples[(source_index - self.consumed) as usize]);
            self.produced += 1;
        }
        self.consumed = end;
        out
    }
}
