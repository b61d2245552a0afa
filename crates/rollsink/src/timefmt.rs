//! Time-pattern compilation and filename suffix helpers
//!
//! File names are derived from strftime-style patterns resolved against the
//! local wall clock. Patterns are validated up front so a typo surfaces at
//! configuration time rather than as a panic on the write path.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Timelike};

use crate::common::SinkError;

/// Suffix for a new file every minute (e.g. `app.log.202501151030`)
pub const MINUTELY: &str = ".%Y%m%d%H%M";

/// Suffix for a new file every hour
pub const HOURLY: &str = ".%Y%m%d%H";

/// Suffix for a new file every day
pub const DAILY: &str = ".%Y%m%d";

/// Suffix for a new file every month
pub const MONTHLY: &str = ".%Y%m";

/// Suffix for a new file every year
pub const YEARLY: &str = ".%Y";

/// A validated strftime-style pattern.
///
/// Compiling checks every conversion specifier; formatting afterwards cannot
/// fail.
#[derive(Debug, Clone)]
pub struct TimePattern {
    pattern: String,
}

impl TimePattern {
    /// Compile a pattern, rejecting unknown or truncated specifiers.
    pub fn compile(pattern: &str) -> Result<Self, SinkError> {
        let invalid = StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error));
        if invalid {
            return Err(SinkError::InvalidTimePattern {
                pattern: pattern.to_owned(),
            });
        }
        Ok(Self {
            pattern: pattern.to_owned(),
        })
    }

    /// Expand the pattern for the given instant.
    pub fn format(&self, at: DateTime<Local>) -> String {
        at.format(&self.pattern).to_string()
    }

    /// The raw pattern string.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Suffix appended to a file name when it is rotated away on size,
/// e.g. `bk-20250115-103045.12345` (five fractional-second digits).
pub fn backup_suffix(at: DateTime<Local>) -> String {
    let frac = (at.nanosecond() % 1_000_000_000) / 10_000;
    format!("bk-{}.{:05}", at.format("%Y%m%d-%H%M%S"), frac)
}
