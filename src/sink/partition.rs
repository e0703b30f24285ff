//! Partition writer: one drain thread per output month

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Asynchronous sink for one destination
///
/// `write` only enqueues. A dedicated thread takes chunks off an unbounded
/// queue, writes each one and flushes immediately. `close` stops accepting
/// writes, waits until the thread has drained the queue, then joins it, so
/// nothing accepted by `write` is lost.
pub struct PartitionWriter {
    name: String,
    tx: Sender<String>,
    rx: Receiver<String>,
    running: Arc<AtomicBool>,
    // Held shared by `write` across check and send, exclusively by `close`
    gate: RwLock<()>,
    written: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl PartitionWriter {
    /// Start the drain thread for `destination`
    ///
    /// The thread is named after `name` and wakes every `poll` to re-check
    /// the running flag while idle.
    pub fn spawn(
        name: impl Into<String>,
        destination: Box<dyn Write + Send>,
        poll: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<String>();
        let running = Arc::new(AtomicBool::new(true));
        let written = Arc::new(AtomicU64::new(0));

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn({
                let rx = rx.clone();
                let running = running.clone();
                let written = written.clone();
                let name = name.clone();
                move || drain_loop(&name, destination, rx, running, written, poll)
            })?;

        Ok(Self {
            name,
            tx,
            rx,
            running,
            gate: RwLock::new(()),
            written,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Enqueue `text` without blocking
    ///
    /// Fails with [`Error::WriterClosed`] once `close` has begun.
    pub fn write(&self, text: impl Into<String>) -> Result<()> {
        let _open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !self.running.load(Ordering::SeqCst) {
            return Err(self.closed());
        }
        self.tx.send(text.into()).map_err(|_| self.closed())
    }

    /// Chunks accepted but not yet written
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Chunks written and flushed so far
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Name of the drain thread (`partition-<yyyy-mm>`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain, flush and join; idempotent
    pub fn close(&self) -> Result<()> {
        {
            let _closing = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            self.running.store(false, Ordering::SeqCst);
        }

        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.join() {
            Ok(result) => {
                result?;
                let stranded = self.rx.try_iter().count();
                if stranded > 0 {
                    tracing::error!(partition = %self.name, stranded, "chunks left after drain");
                    return Err(self.closed());
                }
                tracing::debug!(
                    partition = %self.name,
                    written = self.written(),
                    "partition writer closed"
                );
                Ok(())
            }
            Err(_) => Err(Error::TaskJoin(format!("{} drain thread panicked", self.name))),
        }
    }

    fn closed(&self) -> Error {
        Error::WriterClosed {
            partition: self.name.clone(),
        }
    }
}

impl Drop for PartitionWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(partition = %self.name, error = %e, "partition writer failed on drop");
        }
    }
}

fn drain_loop(
    name: &str,
    mut destination: Box<dyn Write + Send>,
    rx: Receiver<String>,
    running: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    poll: Duration,
) -> std::io::Result<()> {
    tracing::debug!(partition = %name, "drain thread started");
    let mut first_error: Option<std::io::Error> = None;

    while running.load(Ordering::SeqCst) || !rx.is_empty() {
        match rx.recv_timeout(poll) {
            Ok(text) => {
                match destination
                    .write_all(text.as_bytes())
                    .and_then(|_| destination.flush())
                {
                    Ok(()) => {
                        written.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        tracing::error!(
                            partition = %name,
                            error = %e,
                            "failed to write partition chunk"
                        );
                        first_error.get_or_insert(e);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let flushed = destination.flush();
    match first_error {
        Some(e) => Err(e),
        None => flushed,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Shared in-memory destination that sleeps on every write
    #[derive(Clone, Default)]
    struct SlowBuffer {
        data: Arc<Mutex<Vec<u8>>>,
        delay: Duration,
    }

    impl Write for SlowBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::thread::sleep(self.delay);
            self.data.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn close_waits_for_slow_destination_to_drain() {
        let buffer = SlowBuffer {
            delay: Duration::from_millis(20),
            ..SlowBuffer::default()
        };
        let writer = PartitionWriter::spawn(
            "partition-test",
            Box::new(buffer.clone()),
            Duration::from_millis(10),
        )
        .unwrap();

        for i in 0..10 {
            writer.write(format!("line {i}\n")).unwrap();
        }
        assert!(writer.pending() > 0, "slow destination leaves chunks queued");

        writer.close().unwrap();

        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.written(), 10);
        let text = String::from_utf8(buffer.data.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 10);
        assert!(text.starts_with("line 0\n"), "chunks keep their order");
    }

    #[test]
    fn write_after_close_is_rejected() {
        let writer = PartitionWriter::spawn(
            "partition-x",
            Box::new(SlowBuffer::default()),
            Duration::from_millis(10),
        )
        .unwrap();
        writer.close().unwrap();

        match writer.write("late\n") {
            Err(Error::WriterClosed { partition }) => assert_eq!(partition, "partition-x"),
            other => panic!("expected WriterClosed, got {other:?}"),
        }
        // Second close is a no-op
        writer.close().unwrap();
    }

    #[test]
    fn idle_writer_closes_within_poll_interval() {
        let writer = PartitionWriter::spawn(
            "partition-idle",
            Box::new(SlowBuffer::default()),
            Duration::from_millis(50),
        )
        .unwrap();
        let start = Instant::now();

        writer.close().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn write_failures_surface_on_close() {
        let writer = PartitionWriter::spawn(
            "partition-bad",
            Box::new(FailingWriter),
            Duration::from_millis(10),
        )
        .unwrap();
        writer.write("x\n").unwrap();

        assert!(matches!(writer.close(), Err(Error::Io(_))));
        assert_eq!(writer.written(), 0);
    }

    #[test]
    fn writes_racing_close_are_either_rejected_or_written() {
        let buffer = SlowBuffer::default();
        let writer = Arc::new(
            PartitionWriter::spawn(
                "partition-race",
                Box::new(buffer.clone()),
                Duration::from_millis(1),
            )
            .unwrap(),
        );

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let writer = writer.clone();
                std::thread::spawn(move || {
                    let mut accepted = 0u64;
                    for i in 0..500 {
                        if writer.write(format!("{t}-{i}\n")).is_ok() {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();
        std::thread::sleep(Duration::from_millis(2));
        writer.close().unwrap();
        let accepted: u64 = writers.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(writer.written(), accepted);
        assert_eq!(writer.pending(), 0);
        let text = String::from_utf8(buffer.data.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count() as u64, accepted);
    }

    #[test]
    fn drain_thread_carries_partition_name() {
        let seen = Arc::new(Mutex::new(None));

        struct NameProbe(Arc<Mutex<Option<String>>>);
        impl Write for NameProbe {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                *self.0.lock().unwrap() = std::thread::current().name().map(str::to_string);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let writer = PartitionWriter::spawn(
            "partition-2024-03",
            Box::new(NameProbe(seen.clone())),
            Duration::from_millis(10),
        )
        .unwrap();
        writer.write("x").unwrap();
        writer.close().unwrap();

        assert_eq!(seen.lock().unwrap().as_deref(), Some("partition-2024-03"));
        assert_eq!(writer.name(), "partition-2024-03");
    }
}
