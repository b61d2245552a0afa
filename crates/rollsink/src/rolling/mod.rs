//! Rolling file writer
//!
//! Appends to a file whose name is expanded from a strftime-style pattern,
//! rotates on a size threshold, and reopens when the pattern output changes.
//! A background scavenger enforces retention (count and age) and optionally
//! gzip-compacts rotated files.
//!
//! # Architecture
//!
//! ```text
//! [write()] → [ArcSwap load] → [File::write] → [size check]
//!     ↓ (stale handle / pattern change / full file)
//! [rotation lock] → [rename + reopen] → [ArcSwap store]
//!     ↓ (notify, coalescing)
//! [scavenger thread] → [list siblings] → [retain / unlink / gzip]
//! ```
//!
//! The hot path is lock-free: the handle lives in an `ArcSwapOption` and the
//! byte counter is atomic. The rotation lock is only taken on the rare paths
//! (first open, 10 s staleness window, size threshold crossed). A superseded
//! handle stays usable for writers that loaded it just before the swap and
//! closes when the last reference drops.

pub mod scavenge;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use chrono::{Local, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::common::{Sink, SinkError};
use crate::timefmt::{self, TimePattern};

use scavenge::ScavengerHandle;

/// How long an open handle is trusted before the path is recomputed.
/// Cheap way to pick up pattern changes and external rotations without
/// stat-ing on every write.
const REOPEN_INTERVAL_SECS: i64 = 10;

/// Configuration for a [`RollingWriter`].
///
/// Zero values disable the corresponding behavior, so the default is a
/// plain append-only file that never rotates and never scavenges.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    /// Rotate the file once it reaches this many bytes (0 = never)
    pub max_size: u64,

    /// Delete rotated files older than this many days (0 = keep forever)
    pub max_age_days: u32,

    /// Keep at most this many rotated files (0 = keep all)
    pub max_backups: usize,

    /// Gzip-compact rotated files
    pub compress: bool,

    /// strftime suffix appended to the base path, e.g. `.%Y%m%d` for a
    /// file per day (empty = single fixed file)
    pub time_suffix: String,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            max_size: 0,
            max_age_days: 0,
            max_backups: 0,
            compress: false,
            time_suffix: String::new(),
        }
    }
}

impl RollingConfig {
    /// Rotate once the file reaches `max_size` bytes.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Delete rotated files older than `days` days.
    #[must_use]
    pub fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = days;
        self
    }

    /// Keep at most `count` rotated files.
    #[must_use]
    pub fn with_max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }

    /// Gzip-compact rotated files.
    #[must_use]
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Append a strftime suffix to the base path (see [`crate::timefmt`]).
    #[must_use]
    pub fn with_time_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.time_suffix = suffix.into();
        self
    }

    /// Whether any scavenger work is configured at all.
    pub(crate) fn scavenging_enabled(&self) -> bool {
        self.max_backups > 0 || self.max_age_days > 0 || self.compress
    }
}

/// State shared with the scavenger thread.
pub(crate) struct Shared {
    pub(crate) config: RollingConfig,
    pub(crate) dir: PathBuf,
    pub(crate) base_name: String,
    pub(crate) state: Mutex<PathState>,
    pub(crate) metrics: RollingMetrics,
}

/// Rotation-lock-guarded path state.
pub(crate) struct PathState {
    pub(crate) current_path: PathBuf,
}

/// Counters for rotation and scavenger activity.
#[derive(Debug, Default)]
pub(crate) struct RollingMetrics {
    pub(crate) reopens: AtomicU64,
    pub(crate) rotations: AtomicU64,
    pub(crate) files_removed: AtomicU64,
    pub(crate) files_compressed: AtomicU64,
}

impl RollingMetrics {
    fn snapshot(&self) -> RollingMetricsSnapshot {
        RollingMetricsSnapshot {
            reopens: self.reopens.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            files_removed: self.files_removed.load(Ordering::Relaxed),
            files_compressed: self.files_compressed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of a writer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollingMetricsSnapshot {
    pub reopens: u64,
    pub rotations: u64,
    pub files_removed: u64,
    pub files_compressed: u64,
}

/// Rolling file byte sink.
///
/// Concurrent `write` calls are safe: they load the current handle without
/// locking and only serialize on the rotation lock when a reopen or size
/// rotation is due. No file is opened until the first write.
pub struct RollingWriter {
    shared: Arc<Shared>,
    pattern: TimePattern,
    current_file: ArcSwapOption<File>,
    current_size: AtomicU64,
    open_time: AtomicI64,
    workers: OnceLock<ScavengerHandle>,
}

impl RollingWriter {
    /// Create a writer for `path`.
    ///
    /// Validates the path and the compiled `path + time_suffix` pattern and
    /// creates the parent directory (mode 0755 on unix). The file itself is
    /// opened lazily on the first write.
    pub fn new(path: impl AsRef<Path>, config: RollingConfig) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SinkError::EmptyPath);
        }
        let base_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| SinkError::InvalidPath {
                path: path.to_path_buf(),
            })?;

        let raw_pattern = format!("{}{}", path.to_string_lossy(), config.time_suffix);
        let pattern = TimePattern::compile(&raw_pattern)?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        create_log_dir(&dir)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                dir,
                base_name,
                state: Mutex::new(PathState {
                    current_path: PathBuf::new(),
                }),
                metrics: RollingMetrics::default(),
            }),
            pattern,
            current_file: ArcSwapOption::empty(),
            current_size: AtomicU64::new(0),
            open_time: AtomicI64::new(0),
            workers: OnceLock::new(),
        })
    }

    /// Write a byte slice to the current file, rotating as needed.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.needs_reopen() {
            let mut state = self.shared.state.lock();
            if self.needs_reopen() {
                self.reopen(&mut state);
            }
        }

        let Some(file) = self.current_file.load_full() else {
            return Err(io::Error::other("failed to open log file"));
        };

        let n = (&*file).write(buf)?;
        self.current_size.fetch_add(n as u64, Ordering::Relaxed);

        let max_size = self.shared.config.max_size;
        if max_size > 0 && self.current_size.load(Ordering::Relaxed) >= max_size {
            let mut state = self.shared.state.lock();
            self.rotate(&mut state);
        }
        Ok(n)
    }

    /// Flush the current handle's data down to disk.
    pub fn sync(&self) -> io::Result<()> {
        match self.current_file.load_full() {
            Some(file) => file.sync_data(),
            None => Ok(()),
        }
    }

    /// Release the current handle. Idempotent; a later `write` reopens
    /// transparently. Pending scavenger work is unaffected.
    pub fn close(&self) -> io::Result<()> {
        self.current_file.store(None);
        Ok(())
    }

    /// Current rotation and scavenger counters.
    pub fn metrics(&self) -> RollingMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    fn needs_reopen(&self) -> bool {
        self.current_file.load().is_none()
            || Utc::now().timestamp() - self.open_time.load(Ordering::Relaxed)
                > REOPEN_INTERVAL_SECS
    }

    /// Recompute the patterned path and reopen. Caller holds the rotation
    /// lock.
    fn reopen(&self, state: &mut PathState) {
        let path = PathBuf::from(self.pattern.format(Local::now()));
        if state.current_path != path {
            state.current_path = path.clone();
            self.notify();
        }
        if let Err(error) = self.open_current(&path) {
            tracing::warn!(path = %path.display(), %error, "failed to open log file");
        }
    }

    /// Rotate the full file away under a backup name and start a fresh one.
    /// Caller holds the rotation lock.
    fn rotate(&self, state: &mut PathState) {
        let max_size = self.shared.config.max_size;
        if max_size == 0 || self.current_size.load(Ordering::Relaxed) < max_size {
            return;
        }
        self.current_size.store(0, Ordering::Relaxed);

        let current = state.current_path.clone();
        let backup = backup_path(&current);
        if current.exists() {
            if let Err(error) = fs::rename(&current, &backup) {
                tracing::warn!(
                    from = %current.display(),
                    to = %backup.display(),
                    %error,
                    "failed to rename full log file",
                );
            }
        }
        if let Err(error) = self.open_current(&current) {
            tracing::warn!(path = %current.display(), %error, "failed to reopen log file after rotation");
        }
        self.shared.metrics.rotations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backup = %backup.display(), "rotated log file on size");
        self.notify();
    }

    /// Open (appending, creating) the file at `path` and swap it in.
    /// The superseded handle closes once the last in-flight write drops
    /// its reference.
    fn open_current(&self, path: &Path) -> io::Result<()> {
        self.open_time.store(Utc::now().timestamp(), Ordering::Relaxed);

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o666);
        }
        let file = options.open(path)?;

        self.current_file.store(Some(Arc::new(file)));
        self.shared.metrics.reopens.fetch_add(1, Ordering::Relaxed);

        // Resume the byte count from whatever is already on disk.
        let size = fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        self.current_size.store(size, Ordering::Relaxed);
        Ok(())
    }

    /// Wake the scavenger, spawning it on the first call. The signal is
    /// coalescing: if a wakeup is already pending, this one is dropped.
    fn notify(&self) {
        let workers = self
            .workers
            .get_or_init(|| scavenge::spawn(Arc::clone(&self.shared)));
        let _ = workers.notify_tx.try_send(());
    }
}

impl Sink for RollingWriter {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        RollingWriter::write(self, buf)
    }

    fn sync(&self) -> io::Result<()> {
        RollingWriter::sync(self)
    }
}

impl io::Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RollingWriter::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        RollingWriter::sync(self)
    }
}

impl io::Write for &RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RollingWriter::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        RollingWriter::sync(*self)
    }
}

impl Drop for RollingWriter {
    fn drop(&mut self) {
        // Disconnect the notify channel so the scavenger loop exits, then
        // wait for any in-flight pass to finish.
        if let Some(workers) = self.workers.take() {
            drop(workers.notify_tx);
            if let Some(thread) = workers.thread {
                let _ = thread.join();
            }
        }
    }
}

/// Backup name for a file rotated away on size:
/// `<path>.bk-YYYYMMDD-HHMMSS.fffff`.
fn backup_path(current: &Path) -> PathBuf {
    PathBuf::from(format!(
        "{}.{}",
        current.display(),
        timefmt::backup_suffix(Local::now())
    ))
}

fn create_log_dir(dir: &Path) -> Result<(), SinkError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir).map_err(|source| SinkError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[path = "rolling_test.rs"]
mod rolling_test;
