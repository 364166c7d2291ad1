//! tabpilot - remote command/response coordination for an in-browser agent
//!
//! Main entry point for the tabpilot CLI: the CDP-backed agent and the
//! orchestrator commands that drive it.

mod cli;
mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tabpilot_config::{ConfigLoader, ConfigValidator};

use crate::cli::{Cli, Commands};

/// Log directory (`~/.tabpilot/logs`).
fn log_dir() -> PathBuf {
    ConfigLoader::data_dir().join("logs")
}

fn init_tracing() -> anyhow::Result<()> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("tabpilot")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Flushes the file writer on exit.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        // Console on stderr; stdout carries command output.
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let validation = ConfigValidator::validate(&config);
    for warning in &validation.warnings {
        warn!("config {}: {}", warning.path, warning.message);
    }
    if !validation.is_valid() {
        for e in &validation.errors {
            error!("config {}: {}", e.path, e.message);
        }
        anyhow::bail!("invalid configuration in {}", cli.config.display());
    }

    match cli.command {
        Commands::Agent {
            cdp_endpoint,
            orchestrator,
        } => commands::run_agent(config, cdp_endpoint, orchestrator).await,
        Commands::Exec {
            command,
            params,
            session,
        } => commands::run_exec(config, &command, &params, session).await,
        Commands::Batch {
            file,
            interval_ms,
            session,
        } => commands::run_batch(config, &file, interval_ms, session).await,
    }
}
