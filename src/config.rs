use crate::audio::encoder::AudioFormat;
use crate::defaults;
use crate::error::{CallShieldError, Result};
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub cache: CacheConfig,
    pub contacts: ContactsConfig,
    pub logging: LoggingConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub chunk_interval_secs: u64,
    pub read_buffer_bytes: usize,
    pub idle_backoff_ms: u64,
}

/// Scam cache storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub path: Option<PathBuf>,
}

/// Saved contacts used as the admission allow-list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ContactsConfig {
    pub numbers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            chunk_interval_secs: defaults::CHUNK_INTERVAL_SECS,
            read_buffer_bytes: defaults::READ_BUFFER_BYTES,
            idle_backoff_ms: defaults::IDLE_BACKOFF_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| CallShieldError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            })?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CALLSHIELD_AUDIO_DEVICE → audio.device
    /// - CALLSHIELD_CACHE_PATH → cache.path
    /// - CALLSHIELD_CHUNK_INTERVAL_SECS → audio.chunk_interval_secs
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Empty or unparseable values are ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(device) = get("CALLSHIELD_AUDIO_DEVICE") {
            self.audio.device = Some(device);
        }

        if let Some(path) = get("CALLSHIELD_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(path));
        }

        if let Some(secs) = get("CALLSHIELD_CHUNK_INTERVAL_SECS")
            .and_then(|value| value.trim().parse::<u64>().ok())
        {
            self.audio.chunk_interval_secs = secs;
        }

        self
    }

    /// Reject values the capture pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be greater than 0"));
        }
        if self.audio.chunk_interval_secs == 0 {
            return Err(invalid("audio.chunk_interval_secs", "must be greater than 0"));
        }
        if self.audio.read_buffer_bytes == 0 || self.audio.read_buffer_bytes % 2 != 0 {
            return Err(invalid(
                "audio.read_buffer_bytes",
                "must be a positive even number (whole 16-bit samples)",
            ));
        }
        Ok(())
    }

    /// Capture session settings derived from `[audio]`.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_interval: Duration::from_secs(self.audio.chunk_interval_secs),
            read_buffer_bytes: self.audio.read_buffer_bytes,
            idle_backoff: Duration::from_millis(self.audio.idle_backoff_ms),
            format: AudioFormat {
                sample_rate: self.audio.sample_rate,
                ..AudioFormat::default()
            },
        }
    }

    /// Scam cache file, with `~/` expanded. Defaults under the data directory.
    pub fn cache_path(&self) -> PathBuf {
        match &self.cache.path {
            Some(path) => expand_home(path),
            None => crate::cache::store::FileStore::default_path(),
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/callshield/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callshield")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> CallShieldError {
    CallShieldError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
