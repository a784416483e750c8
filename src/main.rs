use clap::{Parser, Subcommand};
use idempotency_store::config::Settings;
use idempotency_store::error::AppError;
use idempotency_store::idempotency::{IdempotencyCleanupJob, IdempotencyStore};
use idempotency_store::observability::{init_logging, init_metrics, LogConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "idempotency-janitor")]
#[command(about = "Maintain an idempotency store: sweep, export, import, or run the cleanup loop")]
#[command(version)]
struct Cli {
    /// Runs the periodic cleanup loop when omitted
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one cleanup sweep and exit
    Sweep,
    /// Print the whole table as JSON on stdout
    Export,
    /// Load a JSON export from a file
    Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    init_logging(&LogConfig::from(&settings.logging))?;
    init_metrics()?;
    info!("Configuration loaded");

    info!("Opening idempotency store at {}...", settings.storage.url);
    let store = IdempotencyStore::open(&settings.storage).await?;

    let outcome = match cli.command {
        Some(Command::Sweep) => store
            .auto_cleanup(settings.cleanup.response_threshold_ms)
            .await
            .map(|report| {
                info!(
                    "Sweep removed {} keys and {} responses",
                    report.keys_removed, report.responses_removed
                )
            }),
        Some(Command::Export) => store.export_store().await.map(|blob| println!("{}", blob)),
        Some(Command::Import { path }) => match tokio::fs::read_to_string(&path).await {
            Ok(blob) => store
                .import_store(&blob)
                .await
                .map(|count| info!("Imported {} records from {}", count, path.display())),
            Err(e) => Err(AppError::Validation(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        },
        None => {
            let job = IdempotencyCleanupJob::new(
                store.clone(),
                settings.cleanup.response_threshold_ms,
                Duration::from_secs(settings.cleanup.interval_seconds),
            );
            let handle = job.start();
            info!(
                "Cleanup job running every {}s, press Ctrl-C to stop",
                settings.cleanup.interval_seconds
            );

            let stopped = tokio::signal::ctrl_c().await;
            handle.abort();
            stopped.map_err(|e| AppError::Internal(e.into()))
        }
    };

    store.close().await;
    outcome?;

    Ok(())
}
