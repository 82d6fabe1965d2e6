//! callshield - Incoming call screening with live audio chunking
//!
//! Screens calls against a persisted scam-number cache and saved contacts,
//! and streams captured call audio to the host as WAV chunks.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cache;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod defaults;
pub mod error;
pub mod events;
pub mod gate;
pub mod ipc;
pub mod number;
pub mod service;
pub mod session;
pub mod sink;
pub mod telemetry;

#[cfg(feature = "cli")]
pub mod cli;

// Composition root - needs everything
#[cfg(feature = "cli")]
pub mod app;

// Core traits (source -> session -> sink)
pub use audio::recorder::AudioSource;
pub use cache::store::CacheStore;
pub use contacts::ContactResolver;
pub use sink::{CollectorSink, EventSink, JsonLinesSink};

// Screening
pub use cache::ScamNumberCache;
pub use gate::{CallAdmissionGate, CallDirection, CallResponse, IncomingCall, Verdict};
pub use number::PhoneNumber;
pub use service::{Admission, PendingMonitor, ScreeningService};

// Capture
pub use events::CallEvent;
pub use session::{CaptureSession, SessionConfig, SessionSummary};

// Error handling
pub use error::{CallShieldError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
