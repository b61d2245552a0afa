//! Rollsink - rolling file log sink
//!
//! Byte sinks for durable log output: a rolling file writer with size- and
//! time-triggered rotation plus background retention/compaction, and a
//! bounded-queue batching writer that decouples producers from disk I/O.
//!
//! ```text
//! [caller] → (optional) BatchWriter → queue → worker → RollingWriter → file
//!                                                            ↘ scavenger → unlink / gzip
//! ```
//!
//! # Available Writers
//!
//! | Writer | Purpose | Background work |
//! |--------|---------|-----------------|
//! | `RollingWriter` | Append to a time-patterned file, rotate on size | Scavenger (retention + gzip) |
//! | `BatchWriter` | Buffer writes, drain in batches onto an inner sink | Single writer thread |
//!
//! Both implement the [`Sink`] contract (`write` + `sync`) and
//! [`std::io::Write`], so they plug directly into logging engines that
//! expect a write-then-sync byte stream.
//!
//! # Example
//!
//! ```no_run
//! use rollsink::{BatchConfig, BatchWriter, RollingConfig, RollingWriter};
//!
//! # fn main() -> Result<(), rollsink::SinkError> {
//! let rolling = RollingWriter::new(
//!     "logs/app.log",
//!     RollingConfig::default()
//!         .with_max_size(128 * 1024 * 1024)
//!         .with_max_backups(10)
//!         .with_compress(true),
//! )?;
//!
//! let writer = BatchWriter::new(rolling, BatchConfig::default());
//! writer.write(b"ready\n").ok();
//! writer.sync().ok();
//! # Ok(())
//! # }
//! ```

/// Bounded-queue batching writer draining onto an inner sink
pub mod batch;

/// Sink contract and setup-time errors
pub mod common;

/// Rolling file writer with rotation, retention, and compaction
pub mod rolling;

/// Rate-limited error reporting for background paths
pub mod throttle;

/// Time-pattern compilation and filename suffix helpers
pub mod timefmt;

pub use batch::{BatchConfig, BatchMetricsSnapshot, BatchWriter};
pub use common::{Sink, SinkError};
pub use rolling::scavenge::LogFileRecord;
pub use rolling::{RollingConfig, RollingMetricsSnapshot, RollingWriter};
pub use throttle::ErrorThrottle;
pub use timefmt::TimePattern;
