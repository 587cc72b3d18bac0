//! erpsync - ERP collection and load tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use erpsync_common::logging::{init_logging, LogConfig, LogLevel};
use erpsync_ingest::client::OmieClient;
use erpsync_ingest::collector::DateWindow;
use erpsync_ingest::collectors;
use erpsync_ingest::config::Config;
use erpsync_ingest::metrics::MetricsCollector;
use erpsync_ingest::orchestrator::{ExecutionMode, Orchestrator, RunReport};
use erpsync_ingest::report::storage_report;
use erpsync_ingest::storage;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "erpsync")]
#[command(author, version, about = "Collect Omie ERP records into PostgreSQL or BigQuery")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and run a collection
    Run {
        /// Only collectors that support change filtering, over the last --days days
        #[arg(long)]
        incremental: bool,

        /// Incremental window in days (defaults to SYNC_INCREMENTAL_DAYS)
        #[arg(long)]
        days: Option<u32>,

        /// Run collectors concurrently
        #[arg(long)]
        parallel: bool,

        /// Concurrent collectors in parallel mode (defaults to SYNC_MAX_WORKERS)
        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Create every destination table and the metrics table
    Init,

    /// Print the collector registry
    List,

    /// Print row counts and title totals
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .log_file_prefix("erpsync")
        .filter_directives("sqlx=warn,hyper=warn,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e}");
            None
        },
    };

    if let Err(e) = execute(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn execute(command: Command) -> Result<()> {
    match command {
        Command::List => {
            list();
            Ok(())
        },
        Command::Init => {
            let orchestrator = build().await?;
            let ready = orchestrator.initialize().await;
            println!("{ready} tables ready");
            orchestrator.cleanup().await;
            Ok(())
        },
        Command::Stats => {
            let config = Config::load().context("Failed to load configuration")?;
            let storage = storage::connect(&config)
                .await
                .context("Failed to connect to storage")?;
            let report = storage_report(&storage, &collectors::registry()).await;
            println!("{report}");
            storage.close().await;
            Ok(())
        },
        Command::Run {
            incremental,
            days,
            parallel,
            max_workers,
        } => {
            let config = Config::load().context("Failed to load configuration")?;
            let orchestrator = build_with(&config).await?;

            let mode = if parallel {
                ExecutionMode::parallel(max_workers.unwrap_or(config.sync.max_workers))
            } else {
                ExecutionMode::Sequential
            };
            let days = days.unwrap_or(config.sync.incremental_days);

            tokio::select! {
                report = run(&orchestrator, &config, incremental, days, mode) => {
                    print_results(&report);
                    orchestrator.metrics().print_summary();
                },
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, stopping before the next collector");
                    println!("\nInterrupted");
                },
            }

            orchestrator.cleanup().await;
            Ok(())
        },
    }
}

async fn run(
    orchestrator: &Orchestrator,
    config: &Config,
    incremental: bool,
    days: u32,
    mode: ExecutionMode,
) -> RunReport {
    let ready = orchestrator.initialize().await;
    info!(ready, backend = config.backend_name(), "Tables initialized");

    if incremental {
        return orchestrator.run_incremental_collections(days, mode).await;
    }

    let ctx = orchestrator.base_context();
    let mut report = orchestrator.run_collections(mode, &ctx).await;

    let window = DateWindow::ending_today(config.sync.financial_days);
    report.extend(orchestrator.run_financial_collections(window, mode).await);
    report
}

async fn build() -> Result<Orchestrator> {
    let config = Config::load().context("Failed to load configuration")?;
    build_with(&config).await
}

async fn build_with(config: &Config) -> Result<Orchestrator> {
    let api = OmieClient::new(config.api.clone()).context("Failed to build API client")?;
    let storage = storage::connect(config)
        .await
        .context("Failed to connect to storage")?;
    info!(backend = storage.kind(), "Storage connected");

    Ok(Orchestrator::new(
        Arc::new(api),
        storage,
        Arc::new(MetricsCollector::new()),
        config.sync.clone(),
    ))
}

fn list() {
    println!(
        "{:<20} {:<28} {:<26} {:<12} keys",
        "table", "endpoint", "method", "incremental"
    );
    for collector in collectors::registry() {
        println!(
            "{:<20} {:<28} {:<26} {:<12} {}",
            collector.table_name(),
            collector.endpoint(),
            collector.method(),
            if collector.supports_incremental() { "yes" } else { "no" },
            collector.unique_key_columns().join(", ")
        );
    }
}

fn print_results(report: &RunReport) {
    println!();
    for result in &report.results {
        println!("{result}");
    }
    println!(
        "\n{} succeeded, {} failed, {} records in {:.2}s",
        report.succeeded(),
        report.failed(),
        report.total_records(),
        report.duration_secs
    );
}
