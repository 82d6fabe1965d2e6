//! WAV file audio source for simulated calls.

use crate::audio::encoder::samples_to_le_bytes;
use crate::audio::recorder::AudioSource;
use crate::defaults::SAMPLE_RATE;
use crate::error::{CallShieldError, Result};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

/// Replays a WAV file as if it were a microphone.
///
/// Any sample rate and channel count is accepted; audio is converted to
/// mono 16-bit at the target rate (16kHz by default) once at load time.
/// The source is finite: once every byte has been read, `read` returns
/// `Ok(0)` and the session ends.
pub struct WavFileSource {
    pcm: Vec<u8>,
    sample_rate: u32,
    position: usize,
    /// Replay at wall-clock speed instead of as fast as possible.
    realtime: bool,
    started: Option<Instant>,
}

impl WavFileSource {
    /// Decode a WAV file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_at(path, SAMPLE_RATE)
    }

    /// Decode a WAV file from disk, resampling to `sample_rate`.
    pub fn open_at(path: &Path, sample_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| CallShieldError::AudioCapture {
            message: format!("Failed to open WAV file {}: {}", path.display(), e),
        })?;
        Self::from_reader_at(Box::new(std::io::BufReader::new(file)), sample_rate)
    }

    /// Decode WAV data from any reader.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        Self::from_reader_at(reader, SAMPLE_RATE)
    }

    pub fn from_reader_at(reader: Box<dyn Read + Send>, sample_rate: u32) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| CallShieldError::AudioCapture {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        let samples = read_as_i16(&mut wav_reader, spec)?;
        let mono = downmix(&samples, spec.channels);
        let resampled = resample(&mono, spec.sample_rate, sample_rate);

        Ok(Self {
            pcm: samples_to_le_bytes(&resampled),
            sample_rate,
            position: 0,
            realtime: false,
            started: None,
        })
    }

    /// Pace reads to the playback rate.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Total PCM bytes this source will yield.
    pub fn len_bytes(&self) -> usize {
        self.pcm.len()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.pcm.len() as f64 / (self.sample_rate.max(1) as f64 * 2.0))
    }

    /// Bytes that wall-clock time allows us to have delivered so far.
    fn paced_limit(&self) -> usize {
        match (self.realtime, self.started) {
            (true, Some(started)) => {
                let elapsed = started.elapsed().as_secs_f64();
                let samples = (elapsed * self.sample_rate as f64) as usize;
                samples.saturating_mul(2).min(self.pcm.len())
            }
            _ => self.pcm.len(),
        }
    }
}

fn read_as_i16<R: Read>(reader: &mut hound::WavReader<R>, spec: hound::WavSpec) -> Result<Vec<i16>> {
    let read_error = |e: hound::Error| CallShieldError::AudioCapture {
        message: format!("Failed to read WAV samples: {}", e),
    };

    match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => {
            // Narrow samples are scaled up to full 16-bit range
            let shift = 16 - spec.bits_per_sample;
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| v << shift))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(read_error)
        }
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample.saturating_sub(16);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(read_error)
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(read_error),
    }
}

/// Average interleaved channels down to mono.
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

impl AudioSource for WavFileSource {
    fn start(&mut self) -> Result<()> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.position >= self.pcm.len() {
            return Ok(0);
        }

        // Whole samples only
        let room = buf.len() & !1;
        let mut limit = self.paced_limit();
        while self.position >= limit {
            std::thread::sleep(Duration::from_millis(10));
            limit = self.paced_limit();
        }

        let end = (self.position + room).min(limit);
        let n = end - self.position;
        buf[..n].copy_from_slice(&self.pcm[self.position..end]);
        self.position = end;
        Ok(n)
    }

    fn is_finite(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn source_from(sample_rate: u32, channels: u16, samples: &[i16]) -> WavFileSource {
        let data = make_wav_data(sample_rate, channels, samples);
        WavFileSource::from_reader(Box::new(Cursor::new(data))).unwrap()
    }

    fn drain(source: &mut WavFileSource, read_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; read_size];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn mono_16khz_is_passed_through_as_le_bytes() {
        let mut source = source_from(16000, 1, &[100, -2, 300]);

        assert_eq!(source.len_bytes(), 6);
        assert_eq!(drain(&mut source, 64), vec![100, 0, 0xFE, 0xFF, 0x2C, 0x01]);
    }

    #[test]
    fn stereo_is_downmixed() {
        // Pairs: (100, 200), (300, 400)
        let mut source = source_from(16000, 2, &[100, 200, 300, 400]);
        assert_eq!(drain(&mut source, 64), samples_to_le_bytes(&[150, 350]));
    }

    #[test]
    fn higher_rates_are_resampled_to_16khz() {
        let source = source_from(48000, 1, &vec![0i16; 48000]);
        let samples = source.len_bytes() / 2;
        assert!((15900..=16100).contains(&samples));
        assert!((source.duration().as_secs_f64() - 1.0).abs() < 0.01);
    }

    #[test]
    fn target_rate_is_configurable() {
        let data = make_wav_data(16000, 1, &vec![0i16; 16000]);
        let source = WavFileSource::from_reader_at(Box::new(Cursor::new(data)), 8000).unwrap();
        assert_eq!(source.len_bytes(), 16000);
        assert!((source.duration().as_secs_f64() - 1.0).abs() < 0.01);
    }

    #[test]
    fn resampling_keeps_constant_signal_level() {
        let resampled = resample(&vec![1000i16; 44100], 44100, 16000);
        assert!((15900..=16100).contains(&resampled.len()));
        assert!(resampled.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn reads_return_whole_samples_only() {
        let mut source = source_from(16000, 1, &[1, 2, 3]);
        let mut buf = [0u8; 5];

        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn source_is_finite_and_exhausts() {
        let mut source = source_from(16000, 1, &[7; 10]);
        assert!(source.is_finite());
        source.start().unwrap();
        assert_eq!(drain(&mut source, 8).len(), 20);
        assert_eq!(source.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn float_wav_is_converted() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.write_sample(-1.0f32).unwrap();
        writer.finalize().unwrap();

        let mut source = WavFileSource::from_reader(Box::new(Cursor::new(cursor.into_inner())))
            .unwrap();
        let bytes = drain(&mut source, 16);
        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        let second = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(first, 16383);
        assert_eq!(second, -32767);
    }

    #[test]
    fn eight_bit_wav_is_scaled_to_full_range() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for sample in [64i8, -128, 127, 0] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavFileSource::from_reader(Box::new(Cursor::new(cursor.into_inner())))
            .unwrap();
        assert_eq!(
            drain(&mut source, 16),
            samples_to_le_bytes(&[16384, -32768, 32512, 0])
        );
    }

    #[test]
    fn invalid_data_is_an_audio_error() {
        let result = WavFileSource::from_reader(Box::new(Cursor::new(b"not a wav".to_vec())));
        assert!(matches!(result, Err(CallShieldError::AudioCapture { .. })));
    }

    #[test]
    fn missing_file_is_an_audio_error() {
        let result = WavFileSource::open(Path::new("/nonexistent/call.wav"));
        assert!(matches!(result, Err(CallShieldError::AudioCapture { .. })));
    }

    #[test]
    fn realtime_pacing_limits_early_reads() {
        // One second of audio; a read right after start cannot get all of it
        let mut source = source_from(16000, 1, &vec![1i16; 16000]).realtime(true);
        source.start().unwrap();
        let mut buf = vec![0u8; 32000];
        let n = source.read(&mut buf).unwrap();
        assert!(n > 0);
        assert!(n < 32000);
    }
}
