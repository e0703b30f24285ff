//! Registry of partition writers keyed by month

use super::partition::PartitionWriter;
use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::types::PartitionKey;
use dashmap::{DashMap, DashSet};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Lazily created writers, at most one per [`PartitionKey`]
///
/// Creation goes through the map's entry API, so concurrent first uses of a
/// month race on the shard lock and exactly one of them opens the file. The
/// creator enqueues the header before any other thread can see the writer.
pub struct WriterRegistry {
    writers: DashMap<PartitionKey, Arc<PartitionWriter>>,
    headers_written: DashSet<PartitionKey>,
    created: AtomicUsize,
    output: OutputConfig,
    header: String,
    poll: Duration,
}

impl WriterRegistry {
    /// Registry writing `header` at the top of each new file under `output`
    pub fn new(output: OutputConfig, header: impl Into<String>, poll: Duration) -> Self {
        Self {
            writers: DashMap::new(),
            headers_written: DashSet::new(),
            created: AtomicUsize::new(0),
            output,
            header: header.into(),
            poll,
        }
    }

    /// Writer for `key`, creating it on first use
    pub fn get_or_create(&self, key: PartitionKey) -> Result<Arc<PartitionWriter>> {
        if let Some(writer) = self.writers.get(&key) {
            return Ok(writer.value().clone());
        }
        let entry = self
            .writers
            .entry(key)
            .or_try_insert_with(|| self.open(key).map(Arc::new))?;
        Ok(entry.value().clone())
    }

    fn open(&self, key: PartitionKey) -> Result<PartitionWriter> {
        let path = self.path_for(key);
        let resumed = self.output.append
            && std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.output.append)
            .truncate(!self.output.append)
            .open(&path)?;
        let writer = PartitionWriter::spawn(
            format!("partition-{key}"),
            Box::new(BufWriter::new(file)),
            self.poll,
        )?;

        let first = self.headers_written.insert(key);
        if first && !resumed {
            writer.write(self.header.clone())?;
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            partition = %key,
            path = %path.display(),
            resumed,
            "opened partition file"
        );
        Ok(writer)
    }

    /// File path of a partition
    pub fn path_for(&self, key: PartitionKey) -> PathBuf {
        self.output.partition_path(&key.to_string())
    }

    /// Number of writers ever created
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Keys with a live writer, oldest month first
    pub fn keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<_> = self.writers.iter().map(|e| *e.key()).collect();
        keys.sort();
        keys
    }

    /// Chunks queued across all writers
    pub fn pending(&self) -> usize {
        self.writers.iter().map(|e| e.value().pending()).sum()
    }

    /// Close every writer, oldest month first
    ///
    /// All writers are attempted even when one fails; the first failure is
    /// returned.
    pub fn close_all(&self) -> Result<()> {
        let mut first_error: Option<Error> = None;
        for key in self.keys() {
            let writer = match self.writers.get(&key) {
                Some(entry) => entry.value().clone(),
                None => continue,
            };
            if let Err(e) = writer.close() {
                tracing::error!(partition = %key, error = %e, "failed to close partition writer");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
