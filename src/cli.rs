//! Command-line interface for callshield
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Incoming call screening with live audio chunking
#[derive(Parser, Debug)]
#[command(
    name = "callshield",
    version,
    about = "Incoming call screening with live audio chunking"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a chunk interval into whole seconds.
///
/// Accepts bare numbers (seconds) and anything `humantime` understands
/// (`15s`, `1m`, `1m30s`). Zero is rejected.
fn parse_interval_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let secs = match s.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => humantime::parse_duration(s)
            .map(|d| d.as_secs())
            .map_err(|e| e.to_string())?,
    };
    if secs == 0 {
        return Err("interval must be at least one second".to_string());
    }
    Ok(secs)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the host bridge: JSON-line commands on stdin, responses and events on stdout
    Serve {
        /// Audio input device (default: system default)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Replay a WAV file instead of the microphone
        #[arg(long, value_name = "WAV")]
        simulate: Option<PathBuf>,

        /// Replay the simulated file as fast as possible instead of in real time
        #[arg(long, requires = "simulate")]
        fast: bool,

        /// Chunk flush interval (default from config). Examples: 15, 15s, 1m
        #[arg(long, short = 'i', value_name = "DURATION", value_parser = parse_interval_secs)]
        interval: Option<u64>,
    },

    /// Show the verdict for a number without side effects
    Check {
        /// Phone number as dialled or displayed
        number: String,
    },

    /// Inspect or modify the scam-number cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Wrap raw 16kHz mono 16-bit PCM in a WAV header
    Encode {
        /// Raw little-endian PCM input
        input: PathBuf,
        /// WAV output path
        output: PathBuf,
    },

    /// List available audio input devices
    Devices,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Scam cache actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the number of cached scam numbers
    Count,
    /// Add one number to the cache
    Add {
        /// Phone number to add
        number: String,
    },
    /// Replace the whole cache with numbers from a file (one per line)
    Sync {
        /// File with one phone number per line
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["callshield", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                device,
                simulate,
                fast,
                interval,
            } => {
                assert!(device.is_none());
                assert!(simulate.is_none());
                assert!(!fast);
                assert!(interval.is_none());
            }
            other => panic!("Expected Serve command, got {:?}", other),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_serve_simulation() {
        let cli = Cli::try_parse_from([
            "callshield",
            "serve",
            "--simulate",
            "call.wav",
            "--fast",
            "--interval",
            "1m30s",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                simulate,
                fast,
                interval,
                ..
            } => {
                assert_eq!(simulate, Some(PathBuf::from("call.wav")));
                assert!(fast);
                assert_eq!(interval, Some(90));
            }
            other => panic!("Expected Serve command, got {:?}", other),
        }
    }

    #[test]
    fn test_fast_requires_simulate() {
        let result = Cli::try_parse_from(["callshield", "serve", "--fast"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval_secs("15"), Ok(15));
        assert_eq!(parse_interval_secs("15s"), Ok(15));
        assert_eq!(parse_interval_secs(" 2m "), Ok(120));
        assert!(parse_interval_secs("0").is_err());
        assert!(parse_interval_secs("soon").is_err());
    }

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from(["callshield", "check", "+1 (555) 012-3456"]).unwrap();
        match cli.command {
            Commands::Check { number } => assert_eq!(number, "+1 (555) 012-3456"),
            other => panic!("Expected Check command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_actions() {
        let cli = Cli::try_parse_from(["callshield", "cache", "count"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Count
            }
        ));

        let cli = Cli::try_parse_from(["callshield", "cache", "add", "5550199"]).unwrap();
        match cli.command {
            Commands::Cache {
                action: CacheAction::Add { number },
            } => assert_eq!(number, "5550199"),
            other => panic!("Expected cache add, got {:?}", other),
        }

        let cli = Cli::try_parse_from(["callshield", "cache", "sync", "numbers.txt"]).unwrap();
        match cli.command {
            Commands::Cache {
                action: CacheAction::Sync { file },
            } => assert_eq!(file, PathBuf::from("numbers.txt")),
            other => panic!("Expected cache sync, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_encode() {
        let cli = Cli::try_parse_from(["callshield", "encode", "in.pcm", "out.wav"]).unwrap();
        match cli.command {
            Commands::Encode { input, output } => {
                assert_eq!(input, PathBuf::from("in.pcm"));
                assert_eq!(output, PathBuf::from("out.wav"));
            }
            other => panic!("Expected Encode command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["callshield", "-vv", "devices"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_global_options_after_command() {
        let cli = Cli::try_parse_from([
            "callshield",
            "devices",
            "--config",
            "/tmp/config.toml",
            "-q",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
        assert!(cli.quiet);
    }

    #[test]
    fn test_missing_command_is_an_error() {
        let result = Cli::try_parse_from(["callshield"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_command_returns_error() {
        let err = Cli::try_parse_from(["callshield", "invalid"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["callshield", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
