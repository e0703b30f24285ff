//! Aggregator loop run by each consumer thread

use crate::queue::WorkQueue;
use crate::sink::{ErrorSink, WriterRegistry};
use crate::stats::RunStats;
use crate::transform::RowTransformer;
use crate::types::{PartitionKey, QueueItem, WorkItem};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Error-log code for rows that could not be handed to a partition writer
pub const WRITE_FAILURE_CODE: &str = "write";

/// What one consumer did before it saw its sentinel
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Consumer index
    pub consumer: usize,
    /// Batches taken from the queue
    pub batches: u64,
    /// Payloads processed
    pub payloads: u64,
    /// Rows dispatched to partition writers
    pub rows: u64,
}

/// Rows of one batch destined for the same month
#[derive(Default)]
struct Group {
    text: String,
    rows: usize,
    items: Vec<WorkItem>,
}

pub(crate) struct Consumer {
    pub(crate) id: usize,
    pub(crate) queue: WorkQueue,
    pub(crate) transformer: Arc<RowTransformer>,
    pub(crate) registry: Arc<WriterRegistry>,
    pub(crate) errors: Arc<ErrorSink>,
    pub(crate) stats: Arc<RunStats>,
    pub(crate) drain_batch: usize,
}

impl Consumer {
    /// Take batches until this consumer's sentinel arrives
    pub(crate) fn run(self) -> ConsumerReport {
        let mut report = ConsumerReport {
            consumer: self.id,
            ..ConsumerReport::default()
        };
        tracing::debug!(consumer = self.id, "consumer started");

        loop {
            let batch = match self.queue.take_batch(self.drain_batch) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(
                        consumer = self.id,
                        error = %e,
                        "work queue failed, consumer stopping"
                    );
                    break;
                }
            };
            let stop = batch.last().is_some_and(QueueItem::is_sentinel);
            report.batches += 1;
            self.process(batch, &mut report);
            if stop {
                break;
            }
        }

        tracing::debug!(
            consumer = self.id,
            batches = report.batches,
            payloads = report.payloads,
            rows = report.rows,
            "consumer stopped"
        );
        report
    }

    fn process(&self, batch: Vec<QueueItem>, report: &mut ConsumerReport) {
        let mut groups: BTreeMap<PartitionKey, Group> = BTreeMap::new();

        for entry in batch {
            let QueueItem::Payload { payload, item } = entry else {
                continue;
            };
            report.payloads += 1;

            let group = groups.entry(item.partition_key()).or_default();
            match self.transformer.render_into(&payload, &item, &mut group.text) {
                Ok(rows) => {
                    group.rows += rows;
                    group.items.push(item);
                }
                Err(e) => {
                    tracing::error!(
                        consumer = self.id,
                        identifier = %item.identifier,
                        business_day = %item.business_day,
                        error = %e,
                        "payload could not be transformed"
                    );
                    self.record(&item, "payload");
                    self.stats.record_transform_failure();
                }
            }
        }

        for (key, group) in groups {
            if group.rows == 0 {
                continue;
            }
            let written = self
                .registry
                .get_or_create(key)
                .and_then(|writer| writer.write(group.text));
            match written {
                Ok(()) => {
                    self.stats.add_rows(group.rows as u64);
                    report.rows += group.rows as u64;
                }
                Err(e) => {
                    tracing::error!(
                        consumer = self.id,
                        partition = %key,
                        items = group.items.len(),
                        error = %e,
                        "rows could not be handed to the partition writer"
                    );
                    for item in &group.items {
                        self.record(item, WRITE_FAILURE_CODE);
                        self.stats.record_failure();
                    }
                }
            }
        }
    }

    fn record(&self, item: &WorkItem, code: &str) {
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
