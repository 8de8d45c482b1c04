//! Time sources for expiry decisions
//!
//! The cache never calls `Utc::now()` directly; it asks a `Clock`, so tests can
//! move time forward without sleeping.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
///
/// Starts at the system time of construction.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a manual clock frozen at the current system time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a manual clock frozen at `start`
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `by`
    pub fn advance(&self, by: std::time::Duration) {
        let by = Duration::from_std(by).unwrap_or_else(|_| Duration::weeks(52 * 100));
        let mut now = self.now.lock();
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
