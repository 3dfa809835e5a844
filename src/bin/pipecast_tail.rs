//! pipecast-tail: attach to a resource and print its stream
//!
//! Creates `<output>/<resource>/<name>` as a named pipe, copies everything
//! the daemon delivers to stdout, and removes the pipe again on exit.
//!
//! ## Configuration
//! - PIPECAST_OUTPUT_DIR: consumer pipe directory tree (default: output)
//! - PIPECAST_CONFIG: optional YAML file, only `output_dir` is used
//! - PIPECAST_LOG: tracing filter (default: info), logs go to stderr

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use pipecast::config::OUTPUT_DIR_ENV_VAR;
use pipecast::tail::{unique_name, ConsumerPipe};
use pipecast::utils::bootstrap::{init_tracing, shutdown_signal};
use pipecast::Config;

#[derive(Parser, Debug)]
#[command(version, about = "Print the broadcast of one pipecast resource")]
struct Args {
    /// Resource to attach to.
    resource: String,

    /// Consumer pipe name (default: random).
    #[arg(short, long)]
    name: Option<String>,

    /// Consumer pipe directory tree.
    #[arg(long, env = OUTPUT_DIR_ENV_VAR)]
    output_dir: Option<PathBuf>,

    /// YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse();
    let output_dir = match args.output_dir {
        Some(dir) => dir,
        None => Config::load(args.config.as_deref())?.output_dir,
    };
    let name = args.name.unwrap_or_else(unique_name);

    let consumer = ConsumerPipe::create(&output_dir, &args.resource, &name).await?;
    let mut stdout = tokio::io::stdout();

    tokio::select! {
        result = consumer.stream_to(&mut stdout) => result?,
        result = shutdown_signal() => {
            result?;
            info!("Shutting down...");
        }
    }

    Ok(())
}
