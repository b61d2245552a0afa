//! Common types shared by the writers
//!
//! The [`Sink`] trait is the byte-stream contract both writers implement:
//! `write` accepts a byte slice and reports how many bytes were taken,
//! `sync` forces buffered output down to the underlying destination.
//! Logging engines that want a plain [`std::io::Write`] get one via the
//! adapter impls on each writer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Byte-stream sink contract.
///
/// `write` must either accept a private copy of the caller's bytes or fail
/// without retaining any reference to them. `sync` returns once everything
/// accepted before the call has reached the destination.
pub trait Sink: Send + Sync {
    /// Write a byte slice, returning the number of bytes accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Flush accepted bytes down to the destination.
    fn sync(&self) -> io::Result<()>;
}

/// Setup-time and capacity errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// The log file path was empty
    #[error("log file path is empty")]
    EmptyPath,

    /// The path has no final file-name component
    #[error("log file path has no file name: {path}")]
    InvalidPath { path: PathBuf },

    /// The strftime pattern failed to compile
    #[error("invalid time pattern: {pattern}")]
    InvalidTimePattern { pattern: String },

    /// Creating the log directory failed
    #[error("failed to create log directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bounded write queue is full (drop mode only)
    #[error("log queue is full")]
    QueueFull,
}
