//! Command-line interface for measuresync.
//!
//! This module provides the CLI structure for the `measuresync` binary and
//! the formatting of its output.

mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AddCommand, ConfigCommand, ListCommand, OutputFormat, PruneCommand, RunCommand, StatusCommand,
    SyncCommand,
};

/// measuresync - Buffer station measurements and sync them upstream
///
/// Takes a measurement every cycle, keeps it in a local database, and posts
/// every undelivered measurement to the remote API until it is accepted.
#[derive(Debug, Parser)]
#[command(name = "measuresync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the sample-and-sync loop
    Run(RunCommand),

    /// Push unsynced measurements once
    Sync(SyncCommand),

    /// Buffer a measurement entered by hand
    Add(AddCommand),

    /// List buffered measurements
    List(ListCommand),

    /// Show buffer status
    Status(StatusCommand),

    /// Delete old synced measurements
    Prune(PruneCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}
