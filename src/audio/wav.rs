//! WAV file audio source for the file sender.

use crate::audio::convert::SampleBlock;
use crate::error::{BridgeError, Result};
use std::io::Read;

/// Producer of fixed-size sample blocks.
///
/// The relay does not care where audio comes from; the file sender and tests
/// plug their own producers in here.
pub trait BlockSource: Send {
    /// Next block, or `None` when the source is exhausted.
    fn next_block(&mut self) -> Option<SampleBlock>;

    /// Channel count of produced blocks.
    fn channels(&self) -> u16;

    /// Sample rate of produced blocks.
    fn sample_rate(&self) -> u32;
}

/// Audio source that reads from WAV file data.
///
/// Keeps the file's own rate and channel layout; samples are normalised to
/// floats in [-1.0, 1.0].
pub struct WavBlockSource {
    samples: Vec<f32>,
    position: usize,
    channels: u16,
    sample_rate: u32,
    block_frames: usize,
    looping: bool,
}

impl WavBlockSource {
    /// Create from any reader.
    pub fn from_reader(reader: Box<dyn Read + Send>, block_frames: usize) -> Result<Self> {
        let wav_reader = hound::WavReader::new(reader).map_err(|e| BridgeError::AudioInput {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        let samples = read_normalized(wav_reader, spec)?;

        Ok(Self {
            samples,
            position: 0,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            block_frames: block_frames.max(1),
            looping: false,
        })
    }

    /// Open a WAV file from disk.
    pub fn open(path: &std::path::Path, block_frames: usize) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| BridgeError::AudioInput {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), block_frames)
    }

    /// Restart from the beginning when the end of the file is reached.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Total number of samples (all channels).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn read_normalized<R: Read>(
    mut reader: hound::WavReader<R>,
    spec: hound::WavSpec,
) -> Result<Vec<f32>> {
    let read_err = |e: hound::Error| BridgeError::AudioInput {
        message: format!("Failed to read WAV samples: {}", e),
    };

    match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(read_err),
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(read_err)
        }
    }
}

impl BlockSource for WavBlockSource {
    fn next_block(&mut self) -> Option<SampleBlock> {
        if self.samples.is_empty() {
            return None;
        }
        if self.position >= self.samples.len() {
            if !self.looping {
                return None;
            }
            self.position = 0;
        }

        let block_len = self.block_frames * self.channels as usize;
        let end = std::cmp::min(self.position + block_len, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Some(SampleBlock::new(chunk, self.channels, self.sample_rate))
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
