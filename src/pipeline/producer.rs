//! Fetch loop run by each producer task

use crate::fetcher::Fetcher;
use crate::queue::WorkQueue;
use crate::sink::ErrorSink;
use crate::stats::RunStats;
use crate::types::{FetchOutcome, QueueItem, WorkItem};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Work items not yet claimed by a producer
pub(crate) type Backlog = Arc<Mutex<VecDeque<WorkItem>>>;

pub(crate) struct Producer {
    pub(crate) id: usize,
    pub(crate) fetcher: Fetcher,
    pub(crate) backlog: Backlog,
    pub(crate) queue: WorkQueue,
    pub(crate) errors: Arc<ErrorSink>,
    pub(crate) stats: Arc<RunStats>,
    pub(crate) cancel: CancellationToken,
}

impl Producer {
    /// Claim and fetch items until the backlog is empty or the run is cancelled
    ///
    /// Cancellation is checked between items only; an item already being
    /// fetched is finished.
    pub(crate) async fn run(self) -> u64 {
        let mut handled = 0;
        while !self.cancel.is_cancelled() {
            let Some(item) = self.claim() else {
                break;
            };
            self.handle(item).await;
            handled += 1;
        }
        tracing::debug!(producer = self.id, handled, "producer finished");
        handled
    }

    fn claim(&self) -> Option<WorkItem> {
        let mut backlog = match self.backlog.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        backlog.pop_front()
    }

    async fn handle(&self, item: WorkItem) {
        match self.fetcher.fetch(&item).await {
            Ok(FetchOutcome::Payload(payload)) => {
                let entry = QueueItem::Payload {
                    payload,
                    item: item.clone(),
                };
                match self.queue.put_async(entry).await {
                    Ok(()) => self.stats.record_enqueued(),
                    Err(e) => {
                        tracing::error!(
                            producer = self.id,
                            identifier = %item.identifier,
                            business_day = %item.business_day,
                            error = %e,
                            "could not enqueue payload"
                        );
                        self.record(&item, "queue");
                    }
                }
            }
            Ok(FetchOutcome::Skipped(reason)) => {
                tracing::info!(
                    producer = self.id,
                    identifier = %item.identifier,
                    business_day = %item.business_day,
                    code = %reason,
                    "no data, skipping"
                );
                self.stats.record_skip(reason);
            }
            Err(e) => {
                let code = e.error_code();
                tracing::warn!(
                    producer = self.id,
                    identifier = %item.identifier,
                    business_day = %item.business_day,
                    code = %code,
                    error = %e,
                    "fetch failed, recorded to error log"
                );
                self.record(&item, &code);
            }
        }
    }

    fn record(&self, item: &WorkItem, code: &str) {
        self.stats.record_failure();
        if let Err(e) = self.errors.record(item, code) {
            tracing::error!(
                identifier = %item.identifier,
                business_day = %item.business_day,
                code,
                error = %e,
                "failed to append to error log"
            );
        }
    }
}

/// Remove and count whatever is left in the backlog
pub(crate) fn drain_backlog(backlog: &Backlog) -> u64 {
    let mut backlog = match backlog.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let left = backlog.len() as u64;
    backlog.clear();
    left
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionLimiter;
    use crate::config::Config;
    use chrono::NaiveDate;
    use std::time::Duration;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn items(n: u32) -> VecDeque<WorkItem> {
        (1..=n)
            .map(|d| WorkItem::new("A", NaiveDate::from_ymd_opt(2024, 1, d).unwrap()))
            .collect()
    }

    fn producer(
        server: &MockServer,
        temp: &tempfile::TempDir,
        backlog: Backlog,
        queue: WorkQueue,
        cancel: CancellationToken,
    ) -> (Producer, Arc<RunStats>, Arc<ErrorSink>) {
        let mut config = Config::default();
        config.source.base_url = server.uri();
        config.retry.max_attempts = 1;
        let stats = Arc::new(RunStats::new());
        let errors = Arc::new(ErrorSink::open(temp.path().join("errors.csv"), false).unwrap());
        let fetcher = Fetcher::new(
            reqwest::Client::new(),
            Arc::new(config),
            AdmissionLimiter::new(2, Duration::ZERO),
            None,
            stats.clone(),
        );
        let producer = Producer {
            id: 0,
            fetcher,
            backlog,
            queue,
            errors: errors.clone(),
            stats: stats.clone(),
            cancel,
        };
        (producer, stats, errors)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn outcomes_are_enqueued_skipped_or_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/liquidity/v1/securities/A$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"isin":"A"}"#))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().unwrap();
        let backlog: Backlog = Arc::new(Mutex::new(items(3)));
        let queue = WorkQueue::new(8);
        let (p, stats, errors) = producer(
            &server,
            &temp,
            backlog.clone(),
            queue.clone(),
            CancellationToken::new(),
        );

        assert_eq!(p.run().await, 3);

        let summary = stats.summary(0, Duration::ZERO);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.skipped_total(), 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(errors.records(), 1);
        errors.close().unwrap();
        let log = std::fs::read_to_string(errors.path()).unwrap();
        assert!(log.ends_with("\"A\",\"2024-01-03\",\"500\"\n"));
    }

    #[tokio::test]
    async fn cancelled_producer_claims_nothing() {
        let server = MockServer::start().await;
        let temp = tempfile::tempdir().unwrap();
        let backlog: Backlog = Arc::new(Mutex::new(items(4)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (p, _, _) = producer(&server, &temp, backlog.clone(), WorkQueue::new(4), cancel);

        assert_eq!(p.run().await, 0);
        assert_eq!(drain_backlog(&backlog), 4);
        assert_eq!(drain_backlog(&backlog), 0);
    }
}
