//! rowferry CLI - partitioned table copy between SQL databases.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use rowferry::{drivers, health_check, Config, DataCopier, MigrateError, TransferMode};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "rowferry")]
#[command(about = "Concurrent, partitioned table copy between SQL databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every table shared by source and destination
    Run {
        /// Override what happens to destination tables that hold rows
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Override number of tables processed at once
        #[arg(long)]
        max_tables: Option<usize>,

        /// Override number of partition workers per table
        #[arg(long)]
        max_partitions: Option<usize>,
    },

    /// Show what a run would copy without moving rows
    Plan,

    /// Test database connections
    HealthCheck,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    SkipExisting,
    DropAndRecreate,
    ThrowExceptionIfExists,
}

impl From<ModeArg> for TransferMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SkipExisting => TransferMode::SkipExisting,
            ModeArg::DropAndRecreate => TransferMode::DropAndRecreate,
            ModeArg::ThrowExceptionIfExists => TransferMode::ThrowExceptionIfExists,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            mode,
            max_tables,
            max_partitions,
        } => {
            if let Some(mode) = mode {
                config.transfer.mode = mode.into();
            }
            if let Some(n) = max_tables {
                config.transfer.max_concurrent_tables = Some(n);
            }
            if let Some(n) = max_partitions {
                config.transfer.max_partitions_per_table = Some(n);
            }
            let config = config.with_auto_tuning();
            config.validate()?;

            let cancel_token = setup_signal_handler();
            let source = drivers::open(&config.source).await?;
            let destination = drivers::open(&config.destination).await?;
            let copier = DataCopier::from_config(source.clone(), destination.clone(), &config);
            let outcome = copier.run(cancel_token).await;
            source.close().await;
            destination.close().await;
            let report = outcome?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nCopy completed!");
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!(
                    "  Tables: {} copied, {} skipped, {} failed of {}",
                    report.tables_completed,
                    report.tables_skipped,
                    report.tables_failed,
                    report.tables_total
                );
                if report.rows_deleted > 0 {
                    println!("  Rows deleted: {}", report.rows_deleted);
                }
                println!("  Rows copied: {}", report.rows_copied);
                println!("  Bytes copied: {}", report.bytes_copied);
            }
        }

        Commands::Plan => {
            let config = config.with_auto_tuning();
            config.validate()?;
            let source = drivers::open(&config.source).await?;
            let destination = drivers::open(&config.destination).await?;
            let copier = DataCopier::from_config(source.clone(), destination.clone(), &config);
            let outcome = copier.plan().await;
            source.close().await;
            destination.close().await;
            let plans = outcome?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plans)?);
            } else {
                println!(
                    "{:<40} {:>12} {:>12} {:>10} {:>8}",
                    "TABLE", "SOURCE", "DESTINATION", "BATCH", "WORKERS"
                );
                for plan in &plans {
                    let workers = if plan.has_primary_key {
                        plan.workers.to_string()
                    } else {
                        "no pk".to_string()
                    };
                    println!(
                        "{:<40} {:>12} {:>12} {:>10} {:>8}",
                        plan.table,
                        plan.source_rows,
                        plan.destination_rows,
                        plan.rows_per_commit,
                        workers
                    );
                }
            }
        }

        Commands::HealthCheck => {
            let result = health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): {} ({}ms, {} tables)",
                    config.source.r#type,
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms,
                    result.source_tables
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination ({}): {} ({}ms, {} tables)",
                    config.destination.r#type,
                    if result.destination_connected { "OK" } else { "FAILED" },
                    result.destination_latency_ms,
                    result.destination_tables
                );
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::driver("health-check", "Health check failed"));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
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
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on Ctrl-C.
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Shutting down...");
                token.cancel();
            }
            Err(e) => eprintln!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    cancel_token
}
