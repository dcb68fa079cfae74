#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt};
use wabot::{Config, daemon};

/// `wabot` - answers `/ia` and `/img` in your chats with OpenAI.
#[derive(Parser, Debug)]
#[command(name = "wabot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat bot that answers /ia and /img commands.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.wabot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect and answer commands until logged out
    Run {
        /// Keep credentials in memory only; nothing is written to disk
        #[arg(long)]
        ephemeral: bool,
    },

    /// Show the last daemon health snapshot and the stored session
    Status,

    /// Forget the stored session so the next run pairs again
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = match &cli.config {
        Some(path) => Config::load_or_init_at(path)?,
        None => Config::load_or_init()?,
    };

    match cli.command {
        Commands::Run { ephemeral } => daemon::run(config, ephemeral).await,
        Commands::Status => daemon::status(&config).await,
        Commands::Logout => daemon::logout(&config).await,
    }
}
