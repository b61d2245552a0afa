//! Rate-limited error reporting for background paths
//!
//! Background work (the scavenger, the batch worker) swallows I/O errors by
//! design: a telemetry sink must not fail its producers because the disk is
//! briefly unhappy. Swallowed is not silent, though — errors are reported
//! through `tracing`, at most once per interval, with a count of how many
//! were suppressed in between. A full disk produces one warning every few
//! seconds instead of one per dropped write.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default minimum interval between reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Throttled reporter for errors on best-effort paths.
pub struct ErrorThrottle {
    min_interval: Duration,
    last_report: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl ErrorThrottle {
    /// Create a reporter that emits at most once per `min_interval`.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_report: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Report an error. Emits a `tracing` warning if the interval has
    /// elapsed since the previous emission; otherwise only counts it.
    /// Returns whether the error was actually logged.
    pub fn report(&self, context: &str, error: &dyn Display) -> bool {
        let due = {
            let mut last = self.last_report.lock();
            let now = Instant::now();
            match *last {
                Some(at) if now.duration_since(at) < self.min_interval => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };

        if due {
            let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
            if suppressed > 0 {
                tracing::warn!(context, error = %error, suppressed, "write error (throttled)");
            } else {
                tracing::warn!(context, error = %error, "write error");
            }
            true
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Errors counted but not yet logged.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}
