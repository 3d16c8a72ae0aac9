//! Thin CLI entry point: loads a `SystemConfig` from JSON, boots the
//! pipeline, and runs until Ctrl-C (spec §6, SPEC_FULL.md §D). A minimal
//! stand-in for the external control plane's `start`/`stop`/`status`
//! commands, since that HTTP API itself is out of scope.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use skywave_core::{Runtime, SystemConfig};

#[derive(Parser)]
#[command(name = "skywave-core", about = "Multi-channel SDR receiver core")]
struct Cli {
    /// Path to a JSON SystemConfig file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the tracing filter (defaults to RUST_LOG, then "info").
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the pipeline until interrupted.
    Run,
    /// Validates the config and prints its device/channel topology, then
    /// exits. Does not start a pipeline, so there is no metering bus to
    /// snapshot -- this is a static config dump, not a live status check.
    Status,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SystemConfig> {
    use anyhow::Context;

    let path = path.cloned().unwrap_or_else(|| PathBuf::from("skywave.json"));
    let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    skywave_core::logging::init(cli.log_level.as_deref());

    let config = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {e}", "config error:".red().bold());
            return ExitCode::from(3);
        }
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Status => run_status(config),
        Command::Run => run_pipeline(config).await,
    }
}

fn run_status(config: SystemConfig) -> ExitCode {
    let errors = config.validate();
    if errors.iter().any(|e| e.is_fatal()) {
        for e in &errors {
            eprintln!("{} {e}", "config error:".red().bold());
        }
        return ExitCode::from(3);
    }

    println!("{}", "skywave-core status".bold());
    for device in &config.devices {
        println!(
            "  device {} ({:?}) -- {} channel(s)",
            device.index,
            device.kind,
            device.channels.iter().filter(|c| c.enabled).count()
        );
        for channel in device.channels.iter().filter(|c| c.enabled) {
            println!(
                "    channel {} [{}] {:.3} MHz {:?}",
                channel.channel_index,
                channel.label,
                channel.freq_hz as f64 / 1_000_000.0,
                channel.modulation
            );
        }
    }
    ExitCode::SUCCESS
}

async fn run_pipeline(config: SystemConfig) -> ExitCode {
    let mut runtime = Runtime::new(config);
    if let Err(errors) = runtime.start_pipeline() {
        for e in &errors {
            eprintln!("{} {e}", "device init error:".red().bold());
        }
        return ExitCode::from(2);
    }

    println!("{}", "skywave-core running, press Ctrl-C to stop".green());

    let mut poll_interval = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "shutting down".yellow());
                break;
            }
            _ = poll_interval.tick() => {
                runtime.poll_pipeline();
            }
        }
    }

    runtime.shutdown().await;
    ExitCode::SUCCESS
}
