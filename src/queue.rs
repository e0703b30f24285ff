//! Bounded work queue between producers and consumers
//!
//! The queue is the only backpressure point of the pipeline: `put` on a full
//! queue parks the caller until a consumer takes an entry, which caps the
//! number of fetched-but-unwritten payloads regardless of producer count.

use crate::error::{Error, Result};
use crate::types::QueueItem;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

/// Bounded multi-producer multi-consumer FIFO of [`QueueItem`]s
#[derive(Clone, Debug)]
pub struct WorkQueue {
    tx: Sender<QueueItem>,
    rx: Receiver<QueueItem>,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue, blocking the calling thread while the queue is full
    pub fn put(&self, item: QueueItem) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|_| Error::Other("work queue disconnected".to_string()))
    }

    /// Enqueue from async code
    ///
    /// The blocking send runs on tokio's blocking pool, so a full queue parks
    /// a blocking thread instead of an async worker.
    pub async fn put_async(&self, item: QueueItem) -> Result<()> {
        let queue = self.clone();
        tokio::task::spawn_blocking(move || queue.put(item))
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?
    }

    /// Take one entry (blocking), then up to `max_extra` already-queued entries
    ///
    /// Draining stops right after a [`QueueItem::Sentinel`], so a batch holds
    /// at most one sentinel and it is always the last entry. The caller
    /// processes the payloads before it and then stops.
    pub fn take_batch(&self, max_extra: usize) -> Result<Vec<QueueItem>> {
        let first = self
            .rx
            .recv()
            .map_err(|_| Error::Other("work queue disconnected".to_string()))?;
        let mut batch = Vec::with_capacity(1 + max_extra.min(self.rx.len()));
        let stop = first.is_sentinel();
        batch.push(first);
        if stop {
            return Ok(batch);
        }

        for _ in 0..max_extra {
            match self.rx.try_recv() {
                Ok(item) => {
                    let stop = item.is_sentinel();
                    batch.push(item);
                    if stop {
                        break;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(batch)
    }

    /// Entries currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
