//! CLI definitions for tabpilot.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// tabpilot CLI.
#[derive(Parser)]
#[command(name = "tabpilot")]
#[command(about = "Drive a browser through an in-browser agent")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/tabpilot.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the agent against a local Chrome and connect it to the orchestrator
    Agent {
        /// Chrome debugging endpoint (overrides host.cdp_endpoint)
        #[arg(long, env = "TABPILOT_CDP_ENDPOINT")]
        cdp_endpoint: Option<String>,

        /// Orchestrator WebSocket URL (overrides agent.orchestrator_url)
        #[arg(long)]
        orchestrator: Option<String>,
    },

    /// Wait for an agent, run one command and print the result
    Exec {
        /// Command name, e.g. navigateToUrl, click, takeScreenshot
        command: String,

        /// Command parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Wait for an agent and run a batch of operations from a JSON file
    Batch {
        /// File holding `{"operations": [...], "interval_ms": 100}` or a bare operation array
        file: PathBuf,

        /// Pause between steps (overrides the file and timing.batch_interval_ms)
        #[arg(long)]
        interval_ms: Option<u64>,

        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(clap::Args)]
pub(crate) struct SessionArgs {
    /// Seconds to wait for an agent to connect
    #[arg(long, default_value_t = 30)]
    pub agent_timeout: u64,

    /// Directory for screenshots and HTML (overrides relay.artifact_dir)
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,
}
