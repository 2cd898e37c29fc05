//! replicate CLI - copy small MySQL tables from one server to another.

mod display;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use replicate::orchestrator::PlannedTable;
use replicate::{
    ChannelSink, Config, ConnectionDescriptor, Orchestrator, ProgressAggregator, ReplicateError,
    ReplicationConfig, ReplicationResult, RunOutcome, TargetMode,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use display::{BarDisplay, CliDisplay, JsonLinesDisplay, ProgressFormat, SuspendingWriter};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "replicate")]
#[command(about = "Copy small, non-empty MySQL tables from one server to another")]
#[command(version)]
struct Cli {
    /// Source server: user[:password]@host[:port]
    source: String,

    /// Destination server: user[:password]@host[:port]
    destination: String,

    /// Schemas to copy (mirrored under the same name on the destination)
    #[arg(value_name = "SCHEMA", required = true)]
    schemas: Vec<String>,

    /// Path to a YAML file with replication settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of concurrent table workers
    #[arg(long)]
    workers: Option<usize>,

    /// Rows per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Skip tables whose estimated size exceeds this many bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Retries per failed batch read or write
    #[arg(long)]
    max_retries: Option<u32>,

    /// Destination table policy: truncate or drop_recreate
    #[arg(long)]
    target_mode: Option<TargetMode>,

    /// Dry run: list tables and admission decisions without copying
    #[arg(long)]
    dry_run: bool,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Progress output
    #[arg(long, value_enum, default_value = "bars")]
    progress_format: ProgressFormat,

    /// Seconds to wait for in-flight tables after Ctrl-C before aborting them
    #[arg(long)]
    shutdown_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, ReplicateError> {
    let cli = Cli::parse();

    let config = build_config(&cli)?;

    let multi = (cli.progress_format == ProgressFormat::Bars && !cli.dry_run)
        .then(display::multi_progress);

    setup_logging(&cli.verbosity, &cli.log_format, SuspendingWriter::new(multi.clone()))
        .map_err(ReplicateError::Config)?;

    info!(
        "Replicating {} from {} to {}",
        config.schemas.join(", "),
        config.source,
        config.target
    );

    let shutdown_timeout = config.replication.shutdown_timeout_secs;
    let cancel_token = setup_signal_handler(shutdown_timeout).await?;

    let orchestrator = Orchestrator::connect(config).await?;

    if cli.dry_run {
        let result = orchestrator.plan(cancel_token).await;
        print_result(&result, cli.output_json)?;
        return Ok(result.exit_code());
    }

    let (orchestrator, aggregator) = match cli.progress_format {
        ProgressFormat::Off => (orchestrator, None),
        format => {
            let (sink, rx) = ChannelSink::new();
            let display = match (format, multi) {
                (ProgressFormat::Bars, Some(multi)) => CliDisplay::Bars(BarDisplay::new(multi)),
                _ => CliDisplay::Json(JsonLinesDisplay::new(std::io::stderr())),
            };
            let handle = ProgressAggregator::spawn(rx, display);
            (orchestrator.with_progress(Arc::new(sink)), Some(handle))
        }
    };

    // The run consumes the orchestrator; its progress sink goes with it,
    // which lets the aggregator drain and stop.
    let result = orchestrator.run(cancel_token).await;

    if let Some(handle) = aggregator {
        match handle.await {
            Ok(ledger) => debug!("Progress display saw {} finished tables", ledger.terminal_count()),
            Err(e) => warn!("Progress display task failed: {}", e),
        }
    }

    print_result(&result, cli.output_json)?;
    Ok(result.exit_code())
}

/// Merge the settings file, command-line overrides and positionals into a
/// validated configuration.
fn build_config(cli: &Cli) -> Result<Config, ReplicateError> {
    let mut settings = match &cli.config {
        Some(path) => ReplicationConfig::load(path)?,
        None => ReplicationConfig::default(),
    };

    if let Some(w) = cli.workers {
        settings.workers = w;
    }
    if let Some(b) = cli.batch_size {
        settings.batch_size = b;
    }
    if let Some(m) = cli.max_size {
        settings.max_size_bytes = m;
    }
    if let Some(r) = cli.max_retries {
        settings.max_retries = r;
    }
    if let Some(mode) = cli.target_mode {
        settings.target_mode = mode;
    }
    if let Some(t) = cli.shutdown_timeout {
        settings.shutdown_timeout_secs = t;
    }
    settings.validate()?;

    let config = Config {
        source: cli.source.parse::<ConnectionDescriptor>()?,
        target: cli.destination.parse::<ConnectionDescriptor>()?,
        schemas: cli.schemas.clone(),
        replication: settings,
    };
    config.validate()?;

    Ok(config)
}

fn print_result(result: &ReplicationResult, as_json: bool) -> Result<(), ReplicateError> {
    if as_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    if result.dry_run {
        println!("\nDry run completed!");
        for planned in &result.plan {
            println!("  {}", describe_plan(planned));
        }
    } else {
        let status_msg = match result.outcome() {
            RunOutcome::Success => "Replication completed!",
            RunOutcome::TablesFailed => "Replication completed with failed tables",
            RunOutcome::CatalogFailed => "Replication completed with catalog failures",
            RunOutcome::Cancelled => "Replication cancelled",
        };
        println!("\n{}", status_msg);
    }

    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {} total, {} done, {} skipped, {} failed",
        result.tables_total, result.tables_done, result.tables_skipped, result.tables_failed
    );
    if !result.dry_run {
        println!("  Rows: {}", result.rows_transferred);
        println!("  Throughput: {} rows/sec", result.rows_per_second);
    }

    let failed: Vec<_> = result.failed_tables().collect();
    if !failed.is_empty() {
        println!("  Failed tables:");
        for table in failed {
            println!(
                "    {}: {} ({} of {} rows copied)",
                table.key,
                table.error.as_deref().unwrap_or("unknown error"),
                table.rows_copied,
                table.total_rows
            );
        }
    }

    if !result.catalog_failures.is_empty() {
        println!("  Catalog failures:");
        for failure in &result.catalog_failures {
            println!("    {}: {}", failure.schema, failure.error);
        }
    }

    Ok(())
}

fn describe_plan(planned: &PlannedTable) -> String {
    if planned.admission.is_admitted() {
        format!(
            "copy  {} ({} bytes, ~{} rows)",
            planned.key, planned.estimated_size_bytes, planned.estimated_row_count
        )
    } else {
        format!(
            "skip  {} ({}, {} bytes, ~{} rows)",
            planned.key,
            planned.admission.reason(),
            planned.estimated_size_bytes,
            planned.estimated_row_count
        )
    }
}

fn setup_logging(verbosity: &str, format: &str, writer: SuspendingWriter) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(writer);

    let installed = if format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    installed.map_err(|e| format!("could not install logger: {}", e))
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, ReplicateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, ReplicateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\nReceived Ctrl-C. Shutting down gracefully (timeout: {}s)...",
                shutdown_timeout
            );
            token.cancel();
        }
    });

    Ok(cancel_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_overrides_apply_over_defaults() {
        let cli = parse(&[
            "replicate",
            "root:pw@db-a",
            "root@db-b:3307",
            "shop",
            "billing",
            "--workers",
            "4",
            "--batch-size",
            "500",
            "--target-mode",
            "drop-recreate",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.schemas, vec!["shop", "billing"]);
        assert_eq!(config.replication.workers, 4);
        assert_eq!(config.replication.batch_size, 500);
        assert_eq!(config.replication.target_mode, TargetMode::DropRecreate);
        assert_eq!(config.target.port, 3307);
        assert_eq!(config.source.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_invalid_descriptor_is_config_error() {
        let cli = parse(&["replicate", "db-a", "root@db-b", "shop"]);
        let err = build_config(&cli).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let cli = parse(&["replicate", "root@db-a", "root@db-b", "shop", "--workers", "0"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_schema_is_required() {
        assert!(Cli::try_parse_from(["replicate", "root@db-a", "root@db-b"]).is_err());
    }

    #[test]
    fn test_progress_format_values() {
        let cli = parse(&["replicate", "a@x", "b@y", "shop", "--progress-format", "none"]);
        assert_eq!(cli.progress_format, ProgressFormat::Off);
        let cli = parse(&["replicate", "a@x", "b@y", "shop"]);
        assert_eq!(cli.progress_format, ProgressFormat::Bars);
    }
}
