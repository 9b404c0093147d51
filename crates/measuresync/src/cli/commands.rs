//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::config::Config;

/// Run the agent loop.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Root URL of the measurement API (overrides `api.base_url`)
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Seconds between cycles (overrides `sync.interval_secs`)
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

impl RunCommand {
    /// Apply command-line overrides to `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(base_url) = &self.base_url {
            config.api.base_url.clone_from(base_url);
        }
        if let Some(interval) = self.interval {
            config.sync.interval_secs = interval;
        }
    }
}

/// Run one sync pass now.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Root URL of the measurement API (overrides `api.base_url`)
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,
}

impl SyncCommand {
    /// Apply command-line overrides to `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(base_url) = &self.base_url {
            config.api.base_url.clone_from(base_url);
        }
    }
}

/// Buffer a manually entered measurement.
#[derive(Debug, Args)]
pub struct AddCommand {
    /// Student identifier in the remote system
    #[arg(short, long)]
    pub student_id: i64,

    /// Height reading
    #[arg(long)]
    pub height: f64,

    /// Weight reading
    #[arg(long)]
    pub weight: f64,
}

/// List buffered measurements.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Include synced measurements
    #[arg(short, long)]
    pub all: bool,

    /// Maximum number of results
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Delete old synced measurements.
#[derive(Debug, Args)]
pub struct PruneCommand {
    /// Delete synced measurements captured more than this many days ago
    #[arg(long, value_name = "DAYS")]
    pub older_than_days: u32,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Plain);
    }

    #[test]
    fn test_run_command_overrides() {
        let mut config = Config::default();
        let cmd = RunCommand {
            base_url: Some("https://school.example/api/".to_string()),
            interval: Some(5),
            once: false,
        };
        cmd.apply(&mut config);

        assert_eq!(config.api.base_url, "https://school.example/api/");
        assert_eq!(config.sync.interval_secs, 5);
    }

    #[test]
    fn test_run_command_without_overrides_keeps_config() {
        let mut config = Config::default();
        RunCommand {
            base_url: None,
            interval: None,
            once: true,
        }
        .apply(&mut config);

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_sync_command_override() {
        let mut config = Config::default();
        SyncCommand {
            base_url: Some("http://10.0.0.2:8000/api/".to_string()),
        }
        .apply(&mut config);
        assert_eq!(config.api.base_url, "http://10.0.0.2:8000/api/");
    }
}
