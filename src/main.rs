use anyhow::Result;
use callshield::app::{ServeOptions, run_cache, run_check, run_devices, run_encode, run_serve};
use callshield::cli::{Cli, Commands};
use callshield::config::Config;
use callshield::telemetry::{init_tracing, level_for};
use clap::{CommandFactory, Parser};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    config.logging.level = level_for(&config.logging.level, cli.verbose, cli.quiet);
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve {
            device,
            simulate,
            fast,
            interval,
        } => {
            let options = ServeOptions {
                device,
                simulate,
                fast,
                interval_secs: interval,
            };
            run_serve(config, options).await?;
        }
        Commands::Check { number } => {
            let verdict = run_check(&config, &number);
            println!("{}", serde_json::to_string(&verdict)?);
        }
        Commands::Cache { action } => {
            let count = run_cache(&config, action)?;
            println!("{}", count);
        }
        Commands::Encode { input, output } => {
            let written = run_encode(&config, &input, &output)?;
            println!("Wrote {} bytes to {}", written, output.display());
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "callshield",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/callshield/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    let devices = run_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}
