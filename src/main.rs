//! Tidemark: soak a progress hub with a simulated commit pipeline.
//!
//! # Usage
//!
//! ```bash
//! tidemark --tasks 64 --max-waiters 32 --wait-timeout-ms 5 --output json
//! ```
//!
//! Environment variables can also be used:
//! - `TIDEMARK_MAX_WAITERS`: Waiter capacity of the hub
//! - `TIDEMARK_TASKS`: Number of concurrent waiting tasks
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::{bail, Context, Result};
use tidemark::config::{Config, OutputFormat};
use tidemark::observability::metrics::init_metrics_with_endpoint;
use tidemark::observability::tracing::init_tracing;
use tidemark::soak;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    init_tracing(&config.log_level, config.log_format);
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if ctrl_c.await.is_ok() {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);
    });

    let summary = soak::run(config.soak_config(), shutdown_rx).await?;

    match config.output {
        OutputFormat::Text => println!("{summary}"),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to encode summary")?
        ),
    }

    if summary.waits.race_violations > 0 {
        bail!(
            "{} waits were cancelled after their target was reached",
            summary.waits.race_violations
        );
    }
    Ok(())
}
