mod cli;
mod engine;
mod error;
mod model;
mod orchestrator;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr so --json output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Cli::parse();
    let is_silent = args.silent;
    let is_non_interactive = args.silent || args.json;

    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit with code 0 on success for scripted modes
            if is_non_interactive {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
