//! Asynchronous batching writer
//!
//! Buffers writes in a bounded queue drained by a single worker thread,
//! which batches them onto an inner [`Sink`] by byte threshold or periodic
//! tick. Producers never touch the inner sink: it is moved into the worker
//! at construction, so exclusive access holds by construction.
//!
//! ```text
//! [write()] → copy → [bounded queue] → [worker] → scratch → inner.write
//!                          ↑ full?                   ↑ tick / flush_bytes
//!              block, or error in drop mode
//! [sync()] → [sync channel] → worker flushes scratch, drains the queue
//!                             snapshot, then acknowledges
//! ```
//!
//! Inner write errors are swallowed (best-effort log delivery) but counted
//! and reported through the throttled `tracing` reporter.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;
use serde::Deserialize;

use crate::common::{Sink, SinkError};
use crate::throttle::ErrorThrottle;

/// A sync request carries the ack sender the worker signals once the flush
/// and queue drain are done.
type SyncRequest = Sender<()>;

/// Configuration for a [`BatchWriter`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Queue capacity in messages
    pub queue_size: usize,

    /// Flush the scratch buffer once it holds this many bytes
    pub flush_bytes: usize,

    /// Flush the scratch buffer at least this often
    pub flush_interval_ms: u64,

    /// On a full queue, fail the write instead of blocking the producer
    pub drop_on_full: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_size: 10_000,
            flush_bytes: 4096,
            flush_interval_ms: 100,
            drop_on_full: false,
        }
    }
}

impl BatchConfig {
    /// Set the queue capacity in messages.
    #[must_use]
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the scratch-buffer flush threshold in bytes.
    #[must_use]
    pub fn with_flush_bytes(mut self, flush_bytes: usize) -> Self {
        self.flush_bytes = flush_bytes;
        self
    }

    /// Set the periodic flush interval in milliseconds.
    #[must_use]
    pub fn with_flush_interval_ms(mut self, interval_ms: u64) -> Self {
        self.flush_interval_ms = interval_ms;
        self
    }

    /// Fail writes on a full queue instead of blocking.
    #[must_use]
    pub fn with_drop_on_full(mut self, drop_on_full: bool) -> Self {
        self.drop_on_full = drop_on_full;
        self
    }
}

/// Counters for queue and flush activity.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    /// Messages accepted into the queue
    pub messages_enqueued: AtomicU64,

    /// Messages rejected on a full queue (drop mode)
    pub messages_dropped: AtomicU64,

    /// Scratch-buffer flushes to the inner sink
    pub flushes: AtomicU64,

    /// Bytes handed to the inner sink
    pub bytes_flushed: AtomicU64,

    /// Inner write errors (swallowed)
    pub write_errors: AtomicU64,
}

impl BatchMetrics {
    fn snapshot(&self) -> BatchMetricsSnapshot {
        BatchMetricsSnapshot {
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a writer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchMetricsSnapshot {
    pub messages_enqueued: u64,
    pub messages_dropped: u64,
    pub flushes: u64,
    pub bytes_flushed: u64,
    pub write_errors: u64,
}

/// Bounded-queue batching front for an inner sink.
///
/// `write` copies the caller's bytes and enqueues them; the caller's buffer
/// is never retained. Ordering is FIFO across all producers. Dropping the
/// writer runs a final sync; the worker exits once the producer handles are
/// gone.
pub struct BatchWriter {
    queue_tx: Sender<Vec<u8>>,
    sync_tx: Sender<SyncRequest>,
    drop_on_full: bool,
    metrics: Arc<BatchMetrics>,
}

impl BatchWriter {
    /// Wrap `inner`, spawning the worker thread that owns it.
    pub fn new<S: Sink + 'static>(inner: S, config: BatchConfig) -> Self {
        let (queue_tx, queue_rx) = channel::bounded(config.queue_size);
        let (sync_tx, sync_rx) = channel::bounded(0);
        let metrics = Arc::new(BatchMetrics::default());

        let drop_on_full = config.drop_on_full;
        let worker_metrics = Arc::clone(&metrics);
        std::thread::Builder::new()
            .name("rollsink-batch".into())
            .spawn(move || run_worker(inner, config, queue_rx, sync_rx, worker_metrics))
            .expect("failed to spawn batch writer thread");

        Self {
            queue_tx,
            sync_tx,
            drop_on_full,
            metrics,
        }
    }

    /// Enqueue a private copy of `buf`.
    ///
    /// Blocks while the queue is full unless drop mode is on, in which case
    /// a full queue yields [`io::ErrorKind::WouldBlock`] and zero bytes are
    /// accepted.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let message = buf.to_vec();
        if self.drop_on_full {
            match self.queue_tx.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        SinkError::QueueFull,
                    ));
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "batch writer is closed",
                    ));
                }
            }
        } else if self.queue_tx.send(message).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "batch writer is closed",
            ));
        }
        self.metrics.messages_enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(buf.len())
    }

    /// Flush everything enqueued before this call into the inner sink.
    /// Returns once the worker acknowledges the drain.
    pub fn sync(&self) -> io::Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(0);
        if self.sync_tx.send(ack_tx).is_ok() {
            let _ = ack_rx.recv();
        }
        Ok(())
    }

    /// Equivalent to [`BatchWriter::sync`].
    pub fn close(&self) -> io::Result<()> {
        self.sync()
    }

    /// Current queue and flush counters.
    pub fn metrics(&self) -> BatchMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Sink for BatchWriter {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        BatchWriter::write(self, buf)
    }

    fn sync(&self) -> io::Result<()> {
        BatchWriter::sync(self)
    }
}

impl io::Write for BatchWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BatchWriter::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        BatchWriter::sync(self)
    }
}

impl io::Write for &BatchWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BatchWriter::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        BatchWriter::sync(*self)
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        // Final flush; the worker exits once the channels disconnect.
        let _ = self.sync();
    }
}

fn run_worker<S: Sink>(
    inner: S,
    config: BatchConfig,
    queue_rx: Receiver<Vec<u8>>,
    sync_rx: Receiver<SyncRequest>,
    metrics: Arc<BatchMetrics>,
) {
    let throttle = ErrorThrottle::default();
    let mut scratch = BytesMut::with_capacity(config.flush_bytes * 2);
    let ticker = channel::tick(Duration::from_millis(config.flush_interval_ms.max(1)));
    let mut sync_rx = sync_rx;

    loop {
        select! {
            recv(ticker) -> _ => {
                flush_scratch(&inner, &mut scratch, &metrics, &throttle);
            }
            recv(queue_rx) -> message => {
                match message {
                    Ok(message) => {
                        scratch.extend_from_slice(&message);
                        if scratch.len() >= config.flush_bytes {
                            flush_scratch(&inner, &mut scratch, &metrics, &throttle);
                        }
                    }
                    // All producer handles dropped: flush what is left and
                    // exit.
                    Err(_) => break,
                }
            }
            recv(sync_rx) -> request => {
                match request {
                    Ok(ack) => {
                        flush_scratch(&inner, &mut scratch, &metrics, &throttle);
                        drain_queue(&inner, &queue_rx, &metrics, &throttle);
                        let _ = ack.send(());
                    }
                    // The writer is gone; stop selecting on sync requests
                    // and let the queue arm decide when to exit.
                    Err(_) => {
                        sync_rx = channel::never();
                    }
                }
            }
        }
    }

    flush_scratch(&inner, &mut scratch, &metrics, &throttle);
}

fn flush_scratch<S: Sink>(
    inner: &S,
    scratch: &mut BytesMut,
    metrics: &BatchMetrics,
    throttle: &ErrorThrottle,
) {
    if scratch.is_empty() {
        return;
    }
    match inner.write(scratch) {
        Ok(n) => {
            metrics.flushes.fetch_add(1, Ordering::Relaxed);
            metrics.bytes_flushed.fetch_add(n as u64, Ordering::Relaxed);
        }
        Err(error) => {
            metrics.write_errors.fetch_add(1, Ordering::Relaxed);
            throttle.report("batch flush", &error);
        }
    }
    scratch.clear();
}

/// Drain the messages queued at the moment the sync arrived, writing each
/// one through individually.
fn drain_queue<S: Sink>(
    inner: &S,
    queue_rx: &Receiver<Vec<u8>>,
    metrics: &BatchMetrics,
    throttle: &ErrorThrottle,
) {
    let pending = queue_rx.len();
    for _ in 0..pending {
        let Ok(message) = queue_rx.try_recv() else {
            break;
        };
        match inner.write(&message) {
            Ok(n) => {
                metrics.bytes_flushed.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(error) => {
                metrics.write_errors.fetch_add(1, Ordering::Relaxed);
                throttle.report("sync drain", &error);
            }
        }
    }
}
