//! Orchestrator: worker pools and the shutdown protocol
//!
//! A run has three phases:
//!
//! 1. **Setup**: validate the configuration, create the output directory,
//!    open the error log and acquire one token. Any failure here aborts the
//!    run before a single request is made.
//! 2. **Work**: `producers` tokio tasks claim [`WorkItem`]s, fetch them and
//!    put payloads on the bounded [`WorkQueue`]; `consumers` OS threads
//!    drain it in micro-batches and hand rows to the partition writers.
//! 3. **Shutdown**: wait for producers, enqueue one sentinel per consumer,
//!    wait (bounded) for every consumer, then close every partition writer
//!    and finally the error log.
//!
//! Cancelling the run (see [`Pipeline::cancellation_token`]) stops producers
//! from claiming new items; everything already fetched still drains through
//! the normal shutdown sequence.

mod consumer;
mod producer;

pub use consumer::{ConsumerReport, WRITE_FAILURE_CODE};

use crate::admission::AdmissionLimiter;
use crate::auth::{CredentialCache, build_provider};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, build_client};
use crate::queue::WorkQueue;
use crate::sink::{ErrorSink, WriterRegistry};
use crate::stats::{RunStats, RunSummary};
use crate::transform::RowTransformer;
use crate::types::QueueItem;
use crate::utils::ensure_output_dir;
use crate::workload;
use consumer::Consumer;
use producer::{Backlog, Producer, drain_backlog};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One ingestion run
pub struct Pipeline {
    config: Arc<Config>,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
}

/// Shared state handed to the consumer threads
struct Sinks {
    transformer: Arc<RowTransformer>,
    registry: Arc<WriterRegistry>,
    errors: Arc<ErrorSink>,
}

impl Pipeline {
    /// Create a pipeline from a validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            stats: Arc::new(RunStats::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops producers from claiming further work items
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live counters of this run
    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    /// Configuration of this run
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute the run to completion
    ///
    /// Per-item failures are recorded and never returned; only setup and
    /// shutdown failures are.
    pub async fn run(self) -> Result<RunSummary> {
        let started = Instant::now();
        let config = self.config.clone();

        ensure_output_dir(&config.output.output_dir)?;
        let client = build_client(&config)?;
        let transformer = Arc::new(RowTransformer::new(
            &config.schema,
            config.output.delimiter,
        )?);
        let registry = Arc::new(WriterRegistry::new(
            config.output.clone(),
            transformer.header_line(),
            Duration::from_millis(config.pipeline.writer_poll_interval_ms),
        ));
        let errors = Arc::new(ErrorSink::open(
            config.output.error_log_path(),
            config.output.append,
        )?);

        let provider = build_provider(&config.auth, &client);
        if let Some(provider) = &provider {
            if let Err(e) = provider.acquire_token().await {
                tracing::error!(error = %e, "initial token acquisition failed, aborting run");
                return Err(e);
            }
            tracing::info!("authentication ready");
        }

        let items = workload::generate(&config.workload);
        self.stats.set_work_items(items.len() as u64);
        let queue = WorkQueue::new(config.pipeline.queue_capacity);
        let admission = AdmissionLimiter::new(
            config.source.admission_permits,
            Duration::from_millis(config.source.pacing_delay_ms),
        );
        tracing::info!(
            work_items = items.len(),
            producers = config.pipeline.producers,
            consumers = config.pipeline.consumers,
            queue_capacity = queue.capacity(),
            admission_permits = admission.permits(),
            output_dir = %config.output.output_dir.display(),
            "starting run"
        );

        let sinks = Sinks {
            transformer,
            registry: registry.clone(),
            errors: errors.clone(),
        };
        let mut reports = self.spawn_consumers(&queue, &sinks)?;

        let backlog: Backlog = Arc::new(Mutex::new(VecDeque::from(items)));
        let producers: Vec<_> = (0..config.pipeline.producers)
            .map(|id| {
                let credentials = provider
                    .clone()
                    .map(|p| CredentialCache::new(p, config.auth.refresh_margin));
                let producer = Producer {
                    id,
                    fetcher: Fetcher::new(
                        client.clone(),
                        config.clone(),
                        admission.clone(),
                        credentials,
                        self.stats.clone(),
                    ),
                    backlog: backlog.clone(),
                    queue: queue.clone(),
                    errors: errors.clone(),
                    stats: self.stats.clone(),
                    cancel: self.cancel.clone(),
                };
                tokio::spawn(producer.run())
            })
            .collect();

        // 1. Let every producer finish its current item
        for result in futures::future::join_all(producers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "producer task failed");
            }
        }
        let not_started = drain_backlog(&backlog);
        if not_started > 0 {
            tracing::warn!(not_started, "run cancelled, remaining work items skipped");
            self.stats.add_not_started(not_started);
        }
        tracing::debug!(
            peak_in_flight = admission.peak_in_flight(),
            queued = queue.len(),
            "producers finished"
        );

        // 2 + 3. Sentinels behind every payload, then a bounded wait for consumers
        let consumers = config.pipeline.consumers;
        let waited = config.pipeline.shutdown_timeout;
        let drained = tokio::time::timeout(waited, async {
            for _ in 0..consumers {
                queue.put_async(QueueItem::Sentinel).await?;
            }
            let mut finished = Vec::with_capacity(consumers);
            while let Some(report) = reports.recv().await {
                finished.push(report);
            }
            Ok::<_, Error>(finished)
        })
        .await;

        match drained {
            Ok(Ok(finished)) if finished.len() == consumers => {
                tracing::debug!(consumers, "all consumers terminated");
            }
            Ok(Ok(finished)) => {
                tracing::error!(
                    expected = consumers,
                    reported = finished.len(),
                    "consumer thread exited without reporting"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to signal consumers");
                Self::close_best_effort(&registry, &errors);
                return Err(e);
            }
            Err(_) => {
                tracing::error!(
                    waited = ?waited,
                    queued = queue.len(),
                    "consumers did not terminate in time"
                );
                Self::close_best_effort(&registry, &errors);
                return Err(Error::ShutdownTimeout { waited });
            }
        }

        // 4. Writers only after every consumer is gone
        let writers_closed = registry.close_all();
        // 5. Error log last
        let errors_closed = errors.close();

        let summary = self.stats.summary(registry.created(), started.elapsed());
        summary.log();
        if !summary.is_fully_accounted() {
            tracing::error!(
                work_items = summary.work_items,
                accounted = summary.accounted(),
                "work items unaccounted for"
            );
        }
        writers_closed?;
        errors_closed?;
        Ok(summary)
    }

    fn spawn_consumers(
        &self,
        queue: &WorkQueue,
        sinks: &Sinks,
    ) -> Result<mpsc::UnboundedReceiver<ConsumerReport>> {
        let (tx, rx) = mpsc::unbounded_channel();
        for id in 0..self.config.pipeline.consumers {
            let consumer = Consumer {
                id,
                queue: queue.clone(),
                transformer: sinks.transformer.clone(),
                registry: sinks.registry.clone(),
                errors: sinks.errors.clone(),
                stats: self.stats.clone(),
                drain_batch: self.config.pipeline.drain_batch,
            };
            let tx = tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("consumer-{id}"))
                .spawn(move || {
                    let _ = tx.send(consumer.run());
                });
            if let Err(e) = spawned {
                tracing::error!(consumer = id, error = %e, "failed to spawn consumer thread");
                // Release the consumers already running; the queue is still empty
                for _ in 0..id {
                    let _ = queue.put(QueueItem::Sentinel);
                }
                return Err(e.into());
            }
        }
        Ok(rx)
    }

    fn close_best_effort(registry: &WriterRegistry, errors: &ErrorSink) {
        if let Err(e) = registry.close_all() {
            tracing::error!(error = %e, "best-effort writer close failed");
        }
        if let Err(e) = errors.close() {
            tracing::error!(error = %e, "best-effort error log close failed");
        }
    }
}
