//! Default configuration constants for callshield.
//!
//! Shared between the config types, the encoder and the capture session so
//! the audio format is declared in exactly one place.

/// Capture sample rate in Hz.
///
/// 16kHz mono 16-bit is what the downstream scam analysis consumes.
pub const SAMPLE_RATE: u32 = 16000;

/// Capture channel count (mono).
pub const CHANNELS: u16 = 1;

/// Bits per PCM sample.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Seconds between periodic flushes of the capture buffer.
pub const CHUNK_INTERVAL_SECS: u64 = 15;

/// Upper bound on bytes returned by a single microphone read.
///
/// Also bounds the audio lost between the last read and device stop.
pub const READ_BUFFER_BYTES: usize = 8192;

/// Sleep after a read that returned no bytes.
pub const IDLE_BACKOFF_MS: u64 = 10;

/// Size of the canonical RIFF/WAVE header prepended to every chunk.
pub const WAV_HEADER_LEN: usize = 44;

/// Default log filter when neither RUST_LOG nor the config sets one.
pub const LOG_LEVEL: &str = "info";

/// Reason attached to a mid-call alert when the analyser gives none.
pub const DEFAULT_SCAM_REASON: &str = "Scam detected";

/// Reason attached to the alert raised when a cached scam number is blocked.
pub const AUTO_BLOCK_REASON: &str = "auto-blocked";
