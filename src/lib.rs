//! # liquidity-dl
//!
//! Bounded producer/consumer ingestion of paginated liquidity data.
//!
//! Every (identifier × business day) pair of a configured workload is fetched
//! from a paginated JSON source, flattened into delimiter-separated rows and
//! appended to one file per calendar month.
//!
//! ## Design
//!
//! - **Bounded memory**: a fixed-capacity work queue between fetchers and
//!   writers is the only backpressure point
//! - **No lost rows**: each monthly file is written by a dedicated drain thread
//!   that flushes every chunk and is joined only after all consumers stopped
//! - **Partial failures are data**: skips and failures of single work items are
//!   logged and recorded, never fatal
//!
//! ## Quick Start
//!
//! ```no_run
//! use liquidity_dl::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.source.base_url = "https://api.example.com".to_string();
//!     config.workload.identifiers = vec!["XS0000000001".to_string()];
//!
//!     let pipeline = Pipeline::new(config)?;
//!     let summary = pipeline.run().await?;
//!     println!("{} rows written", summary.rows_written);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Global limit on concurrent outbound requests
pub mod admission;
/// Post-run verification of output files
pub mod audit;
/// Token providers and the worker-local credential cache
pub mod auth;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Paginated retrieval of work items
pub mod fetcher;
/// Orchestrator and worker pools
pub mod pipeline;
/// Bounded work queue
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Partition writers and the error log
pub mod sink;
/// Run counters and summary
pub mod stats;
/// JSON-to-row transformation
pub mod transform;
/// Core types
pub mod types;
/// Helper functions
pub mod utils;
/// Business-day calendar and work item generation
pub mod workload;

// Re-export commonly used types
pub use audit::{AuditReport, audit_output};
pub use config::Config;
pub use error::{AuthError, Error, FetchError, Result, TransformError};
pub use pipeline::Pipeline;
pub use stats::RunSummary;
pub use types::{PartitionKey, QueueItem, SkipReason, WorkItem};

/// Run a pipeline, cancelling it on a termination signal
///
/// On a signal, producers stop claiming new work items; payloads that were
/// already fetched still drain through the consumers and partition writers
/// before this returns.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use liquidity_dl::{Config, Pipeline, run_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_json_file("config.json")?;
///     let summary = run_until_signal(Pipeline::new(config)?).await?;
///     println!("{} work items", summary.work_items);
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(pipeline: Pipeline) -> Result<RunSummary> {
    let cancel = pipeline.cancellation_token();
    let run = pipeline.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            tracing::info!("cancelling run, draining work already fetched");
            cancel.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGTERM handler, waiting for SIGINT only"
            );
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(
                error = %e,
                "Could not register SIGINT handler, waiting for SIGTERM only"
            );
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
