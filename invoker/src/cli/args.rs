//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Invoker - run external commands with captured, streamed output
#[derive(Parser, Debug)]
#[command(name = "invoker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log library events at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command, streaming its output live, then print a summary
    Run {
        /// Print a JSON summary with the captured output instead of streaming it
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        target: Target,
    },

    /// Run a command and print each stdout line as it is scanned
    Watch {
        /// Stop and cancel the command once a line matches this regex
        #[arg(long)]
        until: Option<String>,

        #[command(flatten)]
        target: Target,
    },
}

/// The command to launch and how.
#[derive(Args, Debug)]
pub struct Target {
    /// Working directory for the command
    #[arg(short = 'C', long = "dir", default_value = ".")]
    pub dir: PathBuf,

    /// Cancel the command after this many seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// File fed to the command's standard input
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Program to execute
    pub program: PathBuf,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
