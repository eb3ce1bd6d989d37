//! delayctl - feed stdin through a deferred-execution scheduler

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use delay::DelayConfig;
use std::path::{Path, PathBuf};
use tracing::Level;

mod cmd;
mod input;

/// Debounce or batch lines read from stdin
#[derive(Parser)]
#[command(name = "delayctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file with [debounce] and [window] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log scheduler activity at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Debounce `KEY PAYLOAD` lines; only the latest payload per key is printed
    Debounce {
        /// Delay after the last update of a key (overrides config)
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Maximum number of pending keys (overrides config)
        #[arg(long)]
        capacity: Option<usize>,
    },
    /// Collect lines into timed batches and print them
    Window {
        /// Maximum buffered lines between sweeps (overrides config)
        #[arg(long)]
        buffer_capacity: Option<usize>,
        /// Settle delay per batch (overrides config)
        #[arg(long)]
        min_delay_ms: Option<u64>,
        /// Maximum delay per line (overrides config)
        #[arg(long)]
        max_delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries delivered lines, so logs go to stderr
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Debounce { delay_ms, capacity } => {
            if let Some(delay_ms) = delay_ms {
                config.debounce.delay_ms = delay_ms;
            }
            if let Some(capacity) = capacity {
                config.debounce.capacity = capacity;
            }
            cmd::debounce::run(&config.debounce).await
        }
        Commands::Window { buffer_capacity, min_delay_ms, max_delay_ms } => {
            if let Some(buffer_capacity) = buffer_capacity {
                config.window.buffer_capacity = buffer_capacity;
            }
            if let Some(min_delay_ms) = min_delay_ms {
                config.window.min_delay_ms = min_delay_ms;
            }
            if let Some(max_delay_ms) = max_delay_ms {
                config.window.max_delay_ms = max_delay_ms;
            }
            cmd::window::run(&config.window).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<DelayConfig> {
    match path {
        Some(path) => DelayConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(DelayConfig::default()),
    }
}
