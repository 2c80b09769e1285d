//! Float sample blocks to 16-bit little-endian PCM.
//!
//! The encoder reads `s16le` on stdin, the relay receives `f32` blocks. This
//! conversion runs once per inbound frame, so it never resamples, never
//! remixes channels and allocates at most one output buffer.

/// Largest magnitude produced by scaling a clamped sample.
pub const SCALE: f32 = 32767.0;

/// A block of interleaved float samples as delivered by a producer.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Interleaved samples, nominally in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate the producer captured at, in Hz.
    pub sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Number of frames (samples per channel) in this block.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration of this block in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64 * 1000) / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode this block as `s16le` bytes.
    pub fn to_s16le(&self) -> Vec<u8> {
        to_s16le(&self.samples)
    }
}

/// Convert one float sample: clamp to [-1.0, 1.0], scale by 32767, truncate.
///
/// NaN converts to 0.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    // `as` saturates and maps NaN to 0
    (sample.clamp(-1.0, 1.0) * SCALE) as i16
}

/// Convert a slice of float samples into a freshly allocated `s16le` buffer.
pub fn to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    extend_s16le(samples, &mut out);
    out
}

/// Append the `s16le` encoding of `samples` to `out`.
///
/// Lets callers reuse one buffer across blocks.
pub fn extend_s16le(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
}

/// Decode little-endian `f32` bytes (binary relay frames) into samples.
///
/// Returns `None` when the byte count is not a multiple of four.
pub fn f32le_to_samples(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
