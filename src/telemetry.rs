//! Tracing subscriber setup.
//!
//! stdout carries the host protocol, so every log line goes to stderr.

use crate::config::LoggingConfig;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<bool> = OnceLock::new();

/// Filter used when `RUST_LOG` is unset: the configured level for this crate,
/// warnings for everything else.
pub fn default_directive(level: &str) -> String {
    format!("warn,callshield={}", level.trim().to_ascii_lowercase())
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(level)))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber once. Later calls are no-ops.
///
/// Returns whether a subscriber from this crate is active.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    *TRACING_INIT.get_or_init(|| {
        let filter = build_filter(&config.level);
        let result = if config.json {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        } else {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        };
        result.is_ok()
    })
}

/// Map CLI verbosity flags onto a level name.
pub fn level_for(base: &str, verbose: u8, quiet: bool) -> String {
    if quiet {
        return "warn".to_string();
    }
    match verbose {
        0 => base.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}
