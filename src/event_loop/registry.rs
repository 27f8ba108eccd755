//! Watch and timer registry
//!
//! The [`Registry`] is the part of the event loop that callbacks can reach:
//! every watch and timer callback receives `&mut Registry<D>` so it can add,
//! remove or reschedule entries while the loop is dispatching.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use super::timer::TimerTable;
use super::watch::WatchTable;
use crate::clock::{Clock, Monotonic};

/// Watch table, timer table and the clock they are scheduled against
pub struct Registry<D> {
    pub(crate) watches: WatchTable<D>,
    pub(crate) timers: TimerTable<D>,
    clock: Rc<dyn Clock>,
}

impl<D> Registry<D> {
    pub(crate) fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            watches: WatchTable::new(),
            timers: TimerTable::new(),
            clock,
        }
    }

    /// Current time on the loop's clock
    pub fn now(&self) -> Monotonic {
        self.clock.now()
    }

    /// Compute how long the next wait may block
    ///
    /// `requested` is the caller's timeout (`None` blocks forever). The
    /// result never exceeds the time left until the earliest enabled timer.
    pub fn compute_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        let Some(next) = self.timers.next_deadline() else {
            return requested;
        };

        let until_next = self.now().duration_until(next);
        match requested {
            Some(timeout) if timeout <= until_next => Some(timeout),
            _ => Some(until_next),
        }
    }
}

impl<D> fmt::Debug for Registry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("watches", &self.watches.len())
            .field("timers", &self.timers.len())
            .field("now", &self.now())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_registry<D>() -> (Registry<D>, crate::clock::ManualClock) {
    let clock = crate::clock::ManualClock::new();
    (Registry::new(Rc::new(clock.clone())), clock)
}
