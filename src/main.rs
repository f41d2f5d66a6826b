use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, trace, warn};

use leadmetrics::cadence::Cadence;
use leadmetrics::clock::{Clock, SystemClock};
use leadmetrics::config::{default_data_dir, EngineConfig};
use leadmetrics::engine::AnalyticsEngine;
use leadmetrics::error::AnalyticsError;
use leadmetrics::events::{BroadcastEventBus, Event};
use leadmetrics::storage::FileRepository;

/// Lead-funnel metrics aggregation and scheduled reporting
#[derive(Parser)]
#[command(name = "leadmetrics")]
#[command(about = "Aggregate form and traffic events into scheduled metrics reports", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the event log and snapshots
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSON lines file of events, persist them and print the stats
    Replay {
        /// File with one event per line
        file: PathBuf,
    },
    /// Generate a snapshot for a cadence now
    Report {
        #[arg(long, default_value = "daily")]
        cadence: Cadence,
    },
    /// List stored snapshots, newest first
    Snapshots {
        #[arg(long, default_value = "daily")]
        cadence: Cadence,

        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Run anomaly detection over recent daily traffic
    Anomalies {
        /// Trailing days to analyze (default: anomaly_trailing_days from config)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Run the engine until interrupted
    Run,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref());

    let debug_logging = config.as_ref().is_ok_and(|c| c.enable_debug_logging);
    let log_level = match (cli.verbose, debug_logging) {
        (0, false) => "info",
        (0, true) | (1, _) => "debug",
        (2, _) => "trace",
        _ => "trace,tokio=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .init();

    debug!("leadmetrics started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(anyhow::Error::new(e).context("failed to load configuration")),
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<AnalyticsError>()
            .map_or(1, AnalyticsError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli, config: EngineConfig) -> Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let repository = FileRepository::open(&data_dir)
        .await
        .with_context(|| format!("cannot open data directory {}", data_dir.display()))?;
    debug!("Using data directory {}", data_dir.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = AnalyticsEngine::new(
        config,
        Arc::new(repository),
        clock.clone(),
        Arc::new(BroadcastEventBus::default()),
    )?;

    match cli.command {
        Commands::Replay { file } => replay(&engine, clock.as_ref(), &file).await,
        Commands::Report { cadence } => {
            let snapshot = engine.generate_report(cadence, clock.now()).await?;
            print_json(&snapshot)
        }
        Commands::Snapshots { cadence, limit } => {
            let snapshots = engine.get_snapshots_by_type(cadence, limit).await?;
            print_json(&snapshots)
        }
        Commands::Anomalies { days } => {
            let anomalies = engine.detect_anomalies(days).await?;
            print_json(&anomalies)
        }
        Commands::Run => {
            engine.start().await;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            info!("Interrupted, shutting down");
            let report = engine.stop().await;
            info!("Final flush persisted {} events", report.persisted);
            Ok(())
        }
    }
}

async fn replay(engine: &AnalyticsEngine, clock: &dyn Clock, path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut line_number = 0usize;
    let mut skipped = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_event_line(&line, clock.now()) {
            Ok(event) => engine.ingest(event),
            Err(e) => {
                skipped += 1;
                warn!("Skipping line {}: {:#}", line_number, e);
            }
        }
    }

    let report = engine.flush().await;
    if !report.is_clean() {
        bail!(
            "only {} of {} events were persisted",
            report.persisted,
            report.captured
        );
    }
    info!(
        "Replayed {} events from {} ({} skipped)",
        report.persisted,
        path.display(),
        skipped
    );
    print_json(&engine.get_stats())
}

/// A line is either an event object or `{"name": "form.submitted", "payload": {...}}`.
/// Named payloads without a timestamp are stamped with `now`.
fn parse_event_line(line: &str, now: DateTime<Utc>) -> Result<Event> {
    let value: serde_json::Value = serde_json::from_str(line).context("invalid JSON")?;
    if let (Some(name), Some(payload)) = (
        value.get("name").and_then(|n| n.as_str()),
        value.get("payload"),
    ) {
        return Ok(Event::from_named(name, payload.clone(), now)?);
    }
    serde_json::from_value(value).context("not an event")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
