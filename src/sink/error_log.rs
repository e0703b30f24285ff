//! Log of recorded failures

use crate::error::Result;
use crate::transform::escape_cell;
use crate::types::WorkItem;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Header line of the error log
pub const ERROR_LOG_HEADER: &str = "\"ISIN\",\"Date\",\"ErrorCode\"\n";

/// Shared error log
///
/// Every record is appended and flushed under one mutex, so concurrent
/// producers never interleave partial lines.
pub struct ErrorSink {
    path: PathBuf,
    inner: Mutex<Option<BufWriter<File>>>,
    records: AtomicU64,
}

impl ErrorSink {
    /// Open (or create) the log at `path`, writing the header to an empty file
    ///
    /// With `append` false an existing log is truncated, matching how the
    /// monthly files are opened.
    pub fn open(path: impl AsRef<Path>, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;
        let empty = file.metadata()?.len() == 0;

        let mut writer = BufWriter::new(file);
        if empty {
            writer.write_all(ERROR_LOG_HEADER.as_bytes())?;
            writer.flush()?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(Some(writer)),
            records: AtomicU64::new(0),
        })
    }

    /// Append one (identifier, date, code) row and flush it
    pub fn record(&self, item: &WorkItem, code: &str) -> Result<()> {
        let line = format!(
            "{},{},{}\n",
            escape_cell(&item.identifier),
            escape_cell(&item.business_day.to_string()),
            escape_cell(code)
        );

        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(writer) = guard.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.flush()?;
            self.records.fetch_add(1, Ordering::SeqCst);
        } else {
            tracing::warn!(
                identifier = %item.identifier,
                business_day = %item.business_day,
                code,
                "error log already closed, record dropped"
            );
        }
        Ok(())
    }

    /// Rows recorded during this run
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::SeqCst)
    }

    /// Location of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the file; idempotent
    pub fn close(&self) -> Result<()> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
