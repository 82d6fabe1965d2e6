//! Self-describing audio chunks: canonical 44-byte RIFF/WAVE header + PCM.

use crate::defaults::{BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE, WAV_HEADER_LEN};

/// PCM layout written into the chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            bits_per_sample: BITS_PER_SAMPLE,
        }
    }
}

impl AudioFormat {
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.channels) * u32::from(self.bits_per_sample) / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

/// One encoded audio segment. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Vec<u8>);

impl AudioChunk {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: a chunk carries at least its header.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bytes after the header.
    pub fn payload(&self) -> &[u8] {
        &self.0[WAV_HEADER_LEN..]
    }
}

/// Encode with the capture format (16kHz, mono, 16-bit).
pub fn encode(pcm: &[u8]) -> AudioChunk {
    encode_with_format(pcm, AudioFormat::default())
}

/// Prepend a little-endian canonical PCM header to `pcm`.
///
/// Deterministic; an empty payload yields a header-only, playable chunk.
pub fn encode_with_format(pcm: &[u8], format: AudioFormat) -> AudioChunk {
    // RIFF sizes are 32-bit; larger payloads are clamped rather than wrapped
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);
    let riff_len = data_len.saturating_add((WAV_HEADER_LEN - 8) as u32);

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());

    // RIFF chunk
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // linear PCM
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&format.byte_rate().to_le_bytes());
    out.extend_from_slice(&format.block_align().to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    debug_assert_eq!(out.len(), WAV_HEADER_LEN);
    out.extend_from_slice(pcm);
    AudioChunk(out)
}

/// Convert i16 samples to little-endian PCM bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
