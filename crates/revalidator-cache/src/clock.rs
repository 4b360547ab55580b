use std::fmt;

use chrono::{DateTime, Utc};

/// A source of wall-clock time.
///
/// Cache entries are stamped with wall-clock time as they are persisted and may outlive the
/// process, so a monotonic [`Instant`](std::time::Instant) is not an option here.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The [`Clock`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
