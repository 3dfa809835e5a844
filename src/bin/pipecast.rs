//! pipecast: named pipe broadcast daemon
//!
//! Copies every byte written to `<input>/<resource>` into every consumer pipe
//! under `<output>/<resource>/`.
//!
//! ## Architecture
//! ```text
//! producer --> input/r1 --[reader]--+--[writer]--> output/r1/c1 --> consumer
//!                                   +--[writer]--> output/r1/c2 --> consumer
//! ```
//!
//! ## Configuration
//! - PIPECAST_INPUT_DIR: producer pipe directory (default: input)
//! - PIPECAST_OUTPUT_DIR: consumer pipe directory tree (default: output)
//! - PIPECAST_POLL_INTERVAL_MS: polling granularity (default: 100)
//! - PIPECAST_READ_CHUNK_SIZE: bounded read size (default: 4096)
//! - PIPECAST_CONFIG: optional YAML file with the same keys
//! - PIPECAST_LOG: tracing filter (default: info)

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use pipecast::utils::bootstrap::{init_tracing, shutdown_signal};
use pipecast::{Config, Coordinator};

#[derive(Parser, Debug)]
#[command(version, about = "Broadcast named pipes to dynamically attached consumers")]
struct Args {
    /// Producer pipe directory (overrides PIPECAST_INPUT_DIR).
    input_dir: Option<PathBuf>,

    /// Consumer pipe directory tree (overrides PIPECAST_OUTPUT_DIR).
    output_dir: Option<PathBuf>,

    /// YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Polling granularity in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.input_dir {
        config.input_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    config.validate()?;

    let coordinator = Coordinator::new(config);
    let shutdown = coordinator.shutdown_token();

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutting down...");
        shutdown.cancel();
    });

    info!("pipecast started");
    coordinator.run().await?;
    info!("pipecast stopped");

    Ok(())
}
