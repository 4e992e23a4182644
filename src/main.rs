//! ops - team CLI for containerized commands and workflows
//!
//! Resolves ops and workflows from a local manifest or the team catalog,
//! provisions their images, and runs them either as interactive container
//! sessions or as multi-step child-process workflows.

mod api;
mod cli;
mod constants;
mod container;
mod error;
mod image;
mod manifest;
mod pipeline;
mod progress;
mod resolve;
mod runtime;
mod settings;
mod workflow;

use clap::Parser;

use cli::{Cli, Commands};
use constants::{DEBUG_ENV, FORMAT_RED, FORMAT_RESET};
use error::EngineError;

/// Entry point. The engine bubbles every error up to here; this is the
/// only place that decides the process exit code.
#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let outcome = match &cli.command {
        Commands::Run { .. } => match cli.command.run_opts() {
            Some(opts) => pipeline::run(opts).await,
            None => Ok(()),
        },
        Commands::List => pipeline::list().await,
    };

    if let Err(err) = outcome {
        report_error(err);
        std::process::exit(1);
    }
}

/// Print the readable message; the diagnostic channel additionally prints
/// the raw error chain when `OPS_DEBUG` is set.
fn report_error(err: EngineError) {
    eprintln!("{}{}{}", FORMAT_RED, err, FORMAT_RESET);
    if std::env::var_os(DEBUG_ENV).is_some() {
        eprintln!("{:?}", anyhow::Error::new(err));
    }
}
