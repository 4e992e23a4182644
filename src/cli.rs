//! Command-line interface definition and argument parsing
//!
//! This module uses clap to define and parse command-line arguments.

use clap::{Parser, Subcommand};

use crate::pipeline::RunOpts;

/// Command-line arguments for the ops CLI
#[derive(Parser, Debug)]
#[command(
    name = "ops",
    about = "Build, run and share containerized commands and workflows with your team",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an op or workflow by name, or from a local manifest path
    //
    // `--help` belongs to the op here, not to clap: an op may declare its
    // own help metadata, so the auto flag is disabled and the token is
    // captured instead.
    #[command(disable_help_flag = true)]
    Run {
        /// Name (optionally `name:version`) or path of an op or workflow
        name_or_path: String,

        /// Rebuild the image even if it already exists locally
        #[arg(long)]
        build: bool,

        /// Show the op's declared help instead of running it
        #[arg(long = "help", short = 'h')]
        op_help: bool,

        /// Arguments passed through verbatim to the op or workflow
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List ops and workflows from the local manifest or the team catalog
    List,
}

impl Commands {
    /// Convert the parsed `run` surface into engine options.
    pub fn run_opts(&self) -> Option<RunOpts> {
        match self {
            Commands::Run {
                name_or_path,
                build,
                op_help,
                args,
            } => Some(RunOpts {
                name_or_path: name_or_path.clone(),
                build: *build,
                op_help: *op_help,
                args: args.clone(),
            }),
            Commands::List => None,
        }
    }
}
