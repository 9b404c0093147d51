//! `measuresync` - CLI for the measurement sync agent
//!
//! This binary runs the sample-and-sync loop and provides commands for
//! inspecting and maintaining the local measurement buffer.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use measuresync::cli::output::Output;
use measuresync::cli::{
    AddCommand, Cli, Command, ConfigCommand, ListCommand, OutputFormat, PruneCommand, RunCommand,
    StatusCommand, SyncCommand,
};
use measuresync::shutdown::install_ctrl_c_handler;
use measuresync::{
    init_logging, sensor, Agent, Config, HttpMeasurementApi, RetryPolicy, SampleProducer, Sample,
    Shutdown, Storage, SyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config_path = cli.config;
    match cli.command {
        Command::Run(cmd) => handle_run(config_path, &cmd).await,
        Command::Sync(cmd) => handle_sync(config_path, &cmd).await,
        Command::Add(cmd) => handle_add(config_path, &cmd),
        Command::List(cmd) => handle_list(config_path, &cmd),
        Command::Status(cmd) => handle_status(config_path, &cmd),
        Command::Prune(cmd) => handle_prune(config_path, &cmd),
        Command::Config(cmd) => handle_config(config_path, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("failed to load configuration")
}

fn open_storage(config: &Config) -> anyhow::Result<Arc<Storage>> {
    let path = config.database_path();
    let storage = Storage::open(&path)
        .with_context(|| format!("cannot open measurement buffer at {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn build_engine(config: &Config, storage: Arc<Storage>) -> anyhow::Result<SyncEngine> {
    let api = HttpMeasurementApi::new(&config.api.base_url, config.request_timeout())?;
    info!("Delivering measurements to {}", api.endpoint());
    Ok(
        SyncEngine::new(storage, Arc::new(api), RetryPolicy::from_config(config))
            .with_lease_ttl(config.sync_lease_ttl()),
    )
}

async fn handle_run(config_path: Option<PathBuf>, cmd: &RunCommand) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    cmd.apply(&mut config);
    config.validate()?;

    let storage = open_storage(&config)?;
    let engine = build_engine(&config, storage.clone())?;
    let producer = sensor::from_config(&config.sensor)
        .map(|source| SampleProducer::new(source, storage.clone()));
    let mut agent = Agent::new(producer, engine, config.sync_interval());

    let shutdown = Shutdown::new();
    install_ctrl_c_handler(shutdown.clone());

    if cmd.once {
        let report = agent.run_cycle(&shutdown.signal()).await;
        if let Some(id) = report.appended {
            println!("Buffered measurement {id}");
        }
        match report.sync {
            Some(sync) => println!("Sync: {sync}"),
            None => println!("Sync pass aborted; see log for details"),
        }
    } else {
        agent.run(shutdown.signal()).await;
    }
    Ok(())
}

async fn handle_sync(config_path: Option<PathBuf>, cmd: &SyncCommand) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    cmd.apply(&mut config);
    config.validate()?;

    let storage = open_storage(&config)?;
    let engine = build_engine(&config, storage.clone())?;

    let shutdown = Shutdown::new();
    install_ctrl_c_handler(shutdown.clone());

    let report = engine.run_pass(&shutdown.signal()).await?;
    println!("{report}");
    println!("{} measurement(s) still unsynced", storage.count_unsynced()?);
    Ok(())
}

fn handle_add(config_path: Option<PathBuf>, cmd: &AddCommand) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let storage = open_storage(&config)?;

    let id = storage.append_sample(&Sample::new(cmd.student_id, cmd.height, cmd.weight))?;
    println!("Buffered measurement {id}");
    Ok(())
}

fn handle_list(config_path: Option<PathBuf>, cmd: &ListCommand) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let storage = open_storage(&config)?;

    let records = if cmd.all {
        storage.list_recent(cmd.limit)?
    } else {
        let mut pending = storage.list_unsynced()?;
        pending.truncate(cmd.limit);
        pending
    };

    Output::new(cmd.format).print_records(&records)?;
    Ok(())
}

fn handle_status(config_path: Option<PathBuf>, cmd: &StatusCommand) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let storage = open_storage(&config)?;
    let stats = storage.stats()?;

    let format = if cmd.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };
    let endpoint = measuresync::api::measurements_endpoint(&config.api.base_url)?;
    Output::new(format).print_status(&stats, storage.path(), endpoint.as_str())?;
    Ok(())
}

fn handle_prune(config_path: Option<PathBuf>, cmd: &PruneCommand) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(cmd.older_than_days));

    if !cmd.yes {
        println!(
            "This will delete synced measurements captured before {}.",
            cutoff.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("Unsynced measurements are always kept. Use --yes to confirm.");
        return Ok(());
    }

    let storage = open_storage(&config)?;
    let removed = storage.prune_synced_before(cutoff)?;
    println!("Deleted {removed} synced measurement(s)");
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Api]");
                println!("  Base URL:           {}", config.api.base_url);
                println!("  Request timeout:    {}s", config.api.request_timeout_secs);
                println!();
                println!("[Sync]");
                println!("  Interval:           {}s", config.sync.interval_secs);
                println!("  Backoff:            {}", config.sync.backoff_enabled);
                println!("  Initial backoff:    {}s", config.sync.initial_backoff_secs);
                println!("  Max backoff:        {}s", config.sync.max_backoff_secs);
                println!();
                println!("[Sensor]");
                println!("  Kind:               {}", config.sensor.kind);
                println!("  Student ID:         {}", config.sensor.student_id);
                println!("  Height:             {}", config.sensor.height);
                println!("  Weight:             {}", config.sensor.weight);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    error!("Configuration error: {}", e);
                    anyhow::bail!("configuration is invalid: {e}");
                }
            }
        }
    }
    Ok(())
}
