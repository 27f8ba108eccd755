//! Monotonic clock source
//!
//! Timers are scheduled against a [`Clock`]. Time is expressed as a
//! [`Monotonic`] nanosecond count measured from the clock's own epoch,
//! so values stay small and never wrap in practice.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A point on the monotonic timeline, in nanoseconds since the clock epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Monotonic(i64);

impl Monotonic {
    /// Sentinel deadline meaning "never" (disabled timer)
    pub const INFINITE: Monotonic = Monotonic(i64::MAX);

    /// The clock epoch
    pub const ZERO: Monotonic = Monotonic(0);

    /// Create from a raw nanosecond count
    pub const fn from_nanos(nanos: i64) -> Self {
        Monotonic(nanos)
    }

    /// Create from a millisecond count
    pub const fn from_millis(millis: i64) -> Self {
        Monotonic(millis.saturating_mul(1_000_000))
    }

    /// Raw nanosecond count
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Whether this is the "never" sentinel
    pub const fn is_infinite(self) -> bool {
        self.0 == i64::MAX
    }

    /// Add a duration, saturating at [`Monotonic::INFINITE`]
    pub fn saturating_add(self, duration: Duration) -> Monotonic {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        Monotonic(self.0.saturating_add(nanos))
    }

    /// Time from `self` until `later`, zero if `later` is not after `self`
    pub fn duration_until(self, later: Monotonic) -> Duration {
        if later.0 <= self.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(later.0.abs_diff(self.0))
    }
}

impl fmt::Display for Monotonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{:.3}s", self.0 as f64 / 1e9)
        }
    }
}

/// Source of monotonic time for the event loop
pub trait Clock {
    /// Current time; must never go backwards
    fn now(&self) -> Monotonic;
}

/// Clock backed by [`Instant`], with its epoch at creation
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Create a clock whose epoch is now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Monotonic {
        let elapsed = self.start.elapsed().as_nanos();
        Monotonic(i64::try_from(elapsed).unwrap_or(i64::MAX - 1))
    }
}

/// Manually advanced clock
///
/// Clones share the same timeline, so a test can keep one handle and
/// hand another to the event loop.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock stopped at the epoch
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, duration: Duration) {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_add(nanos))
            });
    }

    /// Jump to an absolute time; ignored if it would move backwards
    pub fn set(&self, time: Monotonic) {
        self.nanos.fetch_max(time.as_nanos(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Monotonic {
        Monotonic(self.nanos.load(Ordering::SeqCst))
    }
}
