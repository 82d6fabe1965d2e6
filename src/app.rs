//! Application entry points for each CLI command.
//!
//! Wires config, cache, contacts, audio sources and the host bridge together.

#[cfg(feature = "cpal-audio")]
use crate::audio::capture::{CpalAudioSource, list_devices};
use crate::audio::encoder::encode_with_format;
use crate::audio::recorder::AudioSource;
use crate::audio::wav::WavFileSource;
use crate::cache::ScamNumberCache;
use crate::cache::store::FileStore;
use crate::cli::CacheAction;
use crate::config::Config;
use crate::contacts::StaticContacts;
use crate::error::{CallShieldError, Result};
use crate::gate::{CallAdmissionGate, IncomingCall, Verdict};
use crate::ipc::handler::ServiceHandler;
use crate::ipc::server::{serve_stdio, shared_stdout};
use crate::service::{ScreeningService, SourceFactory};
use crate::sink::{CollectorSink, JsonLinesSink};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Overrides for `serve` given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    pub device: Option<String>,
    pub simulate: Option<PathBuf>,
    /// Replay the simulated file without real-time pacing.
    pub fast: bool,
    pub interval_secs: Option<u64>,
}

/// Run the host bridge until stdin closes.
///
/// Commands arrive as JSON lines on stdin; responses and call events share
/// stdout. Returns the number of commands handled.
pub async fn run_serve(mut config: Config, options: ServeOptions) -> Result<usize> {
    if let Some(device) = options.device {
        config.audio.device = Some(device);
    }
    if let Some(secs) = options.interval_secs {
        config.audio.chunk_interval_secs = secs;
    }
    config.validate()?;

    let output = shared_stdout();
    let sink = Arc::new(JsonLinesSink::new(Arc::clone(&output)));
    let sources = source_factory(&config, options.simulate, !options.fast)?;

    let service = ScreeningService::new(open_cache(&config), contacts(&config), sink, sources)
        .with_session_config(config.session_config());

    info!(
        version = %crate::version_string(),
        interval_secs = config.audio.chunk_interval_secs,
        cached = service.cached_count(),
        "serving host commands on stdin"
    );

    let handler = Arc::new(ServiceHandler::new(Arc::new(service)));
    let handled = serve_stdio(output, Arc::clone(&handler)).await?;

    if let Some(summary) = handler.service().stop_monitoring() {
        info!(
            caller = %summary.caller_number,
            chunks = summary.chunks_emitted,
            "stopped monitoring on shutdown"
        );
    }
    Ok(handled)
}

/// Verdict for `number` against the cache and contact list. Nothing is
/// emitted and no monitoring starts.
pub fn run_check(config: &Config, number: &str) -> Verdict {
    let gate = CallAdmissionGate::new(
        open_cache(config),
        contacts(config),
        Arc::new(CollectorSink::new()),
    );
    gate.evaluate(&IncomingCall::inbound(number))
}

/// Run a cache subcommand and return the resulting count.
pub fn run_cache(config: &Config, action: CacheAction) -> Result<usize> {
    let cache = open_cache(config);
    match action {
        CacheAction::Count => {}
        CacheAction::Add { number } => {
            if cache.add_one(&number)? {
                info!(%number, "added to scam cache");
            } else {
                info!(%number, "already cached");
            }
        }
        CacheAction::Sync { file } => {
            let numbers = read_number_list(&file)?;
            let stored = cache.replace_all(&numbers)?;
            info!(file = %file.display(), stored, "scam cache replaced");
        }
    }
    Ok(cache.count())
}

/// Wrap raw PCM from `input` in a WAV header and write it to `output`.
///
/// Returns the size of the written file in bytes.
pub fn run_encode(config: &Config, input: &Path, output: &Path) -> Result<usize> {
    let pcm = fs::read(input)?;
    if pcm.len() % 2 != 0 {
        warn!(
            bytes = pcm.len(),
            "input ends mid-sample; the trailing byte is kept as-is"
        );
    }
    let chunk = encode_with_format(&pcm, config.session_config().format);
    fs::write(output, chunk.as_bytes())?;
    debug!(input = %input.display(), output = %output.display(), "encoded");
    Ok(chunk.len())
}

/// Names of usable input devices.
#[cfg(feature = "cpal-audio")]
pub fn run_devices() -> Result<Vec<String>> {
    list_devices()
}

#[cfg(not(feature = "cpal-audio"))]
pub fn run_devices() -> Result<Vec<String>> {
    Err(CallShieldError::DeviceUnavailable {
        device: "built without cpal-audio".to_string(),
    })
}

fn open_cache(config: &Config) -> Arc<ScamNumberCache> {
    let path = config.cache_path();
    debug!(path = %path.display(), "opening scam cache");
    Arc::new(ScamNumberCache::open(Box::new(FileStore::new(path))))
}

fn contacts(config: &Config) -> Arc<StaticContacts> {
    Arc::new(StaticContacts::new(&config.contacts.numbers))
}

/// One number per line; blank lines and `#` comments are skipped.
fn read_number_list(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).map_err(|e| CallShieldError::MalformedInput {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    Ok(parse_number_list(&contents))
}

fn parse_number_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Source factory for `serve`: a WAV replay when simulating, otherwise the
/// configured microphone.
fn source_factory(
    config: &Config,
    simulate: Option<PathBuf>,
    realtime: bool,
) -> Result<SourceFactory> {
    let sample_rate = config.audio.sample_rate;

    if let Some(path) = simulate {
        // Fail early on a bad file rather than on the first monitored call
        WavFileSource::open_at(&path, sample_rate)?;
        info!(file = %path.display(), realtime, "simulating calls from WAV file");
        let factory: SourceFactory = Arc::new(move || -> Result<Box<dyn AudioSource>> {
            let source = WavFileSource::open_at(&path, sample_rate)?.realtime(realtime);
            Ok(Box::new(source))
        });
        return Ok(factory);
    }

    microphone_factory(config.audio.device.clone(), sample_rate)
}

#[cfg(feature = "cpal-audio")]
fn microphone_factory(device: Option<String>, sample_rate: u32) -> Result<SourceFactory> {
    let factory: SourceFactory = Arc::new(move || -> Result<Box<dyn AudioSource>> {
        let source = CpalAudioSource::new(device.as_deref())?.with_sample_rate(sample_rate);
        debug!(device = source.device_name(), "opened input device");
        Ok(Box::new(source))
    });
    Ok(factory)
}

#[cfg(not(feature = "cpal-audio"))]
fn microphone_factory(_device: Option<String>, _sample_rate: u32) -> Result<SourceFactory> {
    Err(CallShieldError::DeviceUnavailable {
        device: "built without cpal-audio; use --simulate".to_string(),
    })
}
