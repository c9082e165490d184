//! Invoker - run external commands with race-free output capture.
//!
//! The binary is a thin front end over the library: `run` tees a command's
//! output to the terminal while capturing it, `watch` scans its stdout line
//! by line and can stop the command once a pattern shows up.

mod cli;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{execute, Cli};

fn init_tracing(verbose: bool) {
    let default = if verbose { "invoker=debug" } else { "invoker=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute(cli).await
}
