//! Error types for callshield.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallShieldError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio device unavailable: {device}")]
    DeviceUnavailable { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Cache errors
    #[error("Cache persistence failed: {message}")]
    PersistenceFailure { message: String },

    // Input errors
    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    // Host protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CallShieldError>;

impl CallShieldError {
    /// True for failures that mean the microphone could not be opened at all.
    pub fn is_capture_open_failure(&self) -> bool {
        matches!(
            self,
            CallShieldError::PermissionDenied { .. } | CallShieldError::DeviceUnavailable { .. }
        )
    }
}
