//! Software timers
//!
//! Timers live in a table of at most [`MAX_TIMERS`] entries sorted by
//! deadline, so the earliest deadline is always the first entry. Disabled
//! timers carry [`Monotonic::INFINITE`] and therefore sort last.

use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

use log::{debug, error, trace};
use smallvec::SmallVec;

use super::Registry;
use crate::clock::Monotonic;
use crate::error::LoopError;

/// Maximum number of simultaneous timers
pub const MAX_TIMERS: usize = 128;

/// Unique identifier for timers, never reused within a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(NonZeroU64);

impl TimerId {
    /// Raw identifier value (never zero)
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Timer callback: receives the registry, the loop data and the timer id
pub type TimerCallback<D> = Box<dyn FnMut(&mut Registry<D>, &mut D, TimerId)>;

/// Cleanup hook run exactly once when a timer is removed
pub type TimerCleanup = Box<dyn FnOnce(TimerId)>;

/// Timer registration request
pub struct Timer<D> {
    name: String,
    interval: Duration,
    enabled: bool,
    repeats: bool,
    callback: TimerCallback<D>,
    cleanup: Option<TimerCleanup>,
}

impl<D> Timer<D> {
    /// Create an enabled one-shot timer
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        callback: impl FnMut(&mut Registry<D>, &mut D, TimerId) + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            enabled: true,
            repeats: false,
            callback: Box::new(callback),
            cleanup: None,
        }
    }

    /// Start the timer armed or disarmed
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Re-arm after every firing instead of removing the timer
    pub fn repeating(mut self, repeats: bool) -> Self {
        self.repeats = repeats;
        self
    }

    /// Set a hook run when the timer is removed
    pub fn on_cleanup(mut self, cleanup: impl FnOnce(TimerId) + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

struct TimerEntry<D> {
    id: TimerId,
    name: String,
    interval: Duration,
    trigger_at: Monotonic,
    repeats: bool,
    /// Taken out while the callback runs
    callback: Option<TimerCallback<D>>,
    cleanup: Option<TimerCleanup>,
}

impl<D> TimerEntry<D> {
    fn release(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup(self.id);
        }
    }
}

type DueTimers = SmallVec<[(TimerId, bool); MAX_TIMERS]>;

/// Bounded, deadline-sorted timer table
pub(crate) struct TimerTable<D> {
    entries: SmallVec<[TimerEntry<D>; MAX_TIMERS]>,
    next_id: NonZeroU64,
}

impl<D> TimerTable<D> {
    pub(crate) fn new() -> Self {
        Self {
            entries: SmallVec::new(),
            next_id: NonZeroU64::MIN,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn find(&self, id: TimerId) -> Option<&TimerEntry<D>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    fn find_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry<D>> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    fn sort(&mut self) {
        // Stable, so equal deadlines keep registration order
        self.entries.sort_by_key(|entry| entry.trigger_at);
    }

    /// Earliest enabled deadline
    pub(crate) fn next_deadline(&self) -> Option<Monotonic> {
        self.entries
            .first()
            .map(|entry| entry.trigger_at)
            .filter(|at| !at.is_infinite())
    }

    fn add(&mut self, timer: Timer<D>, now: Monotonic) -> Result<TimerId, LoopError> {
        if self.entries.len() >= MAX_TIMERS {
            return Err(LoopError::TooManyTimers { limit: MAX_TIMERS });
        }

        let id = TimerId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        let trigger_at = if timer.enabled {
            now.saturating_add(timer.interval)
        } else {
            Monotonic::INFINITE
        };

        self.entries.push(TimerEntry {
            id,
            name: timer.name,
            interval: timer.interval,
            trigger_at,
            repeats: timer.repeats,
            callback: Some(timer.callback),
            cleanup: timer.cleanup,
        });
        self.sort();

        Ok(id)
    }

    fn remove(&mut self, id: TimerId) -> Option<TimerEntry<D>> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        Some(self.entries.remove(index))
    }

    fn toggle(&mut self, id: TimerId, enabled: bool, now: Monotonic) -> bool {
        let Some(entry) = self.find_mut(id) else {
            return false;
        };

        let trigger_at = if enabled {
            now.saturating_add(entry.interval)
        } else {
            Monotonic::INFINITE
        };
        if trigger_at == entry.trigger_at {
            return false;
        }

        entry.trigger_at = trigger_at;
        self.sort();
        true
    }

    /// Reschedule every due timer and capture it for dispatch
    ///
    /// Deadlines move to `now + interval` before any callback runs, so a
    /// callback that reschedules its own timer wins over this update.
    fn capture_due(&mut self, now: Monotonic) -> DueTimers {
        let mut due = DueTimers::new();
        for entry in self.entries.iter_mut() {
            if entry.trigger_at > now {
                break;
            }
            entry.trigger_at = now.saturating_add(entry.interval);
            due.push((entry.id, entry.repeats));
        }

        if !due.is_empty() {
            self.sort();
        }
        due
    }

    fn take_callback(&mut self, id: TimerId) -> Option<TimerCallback<D>> {
        self.find_mut(id)?.callback.take()
    }

    fn restore_callback(&mut self, id: TimerId, callback: TimerCallback<D>) {
        if let Some(entry) = self.find_mut(id) {
            if entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }

    fn drain(&mut self) -> SmallVec<[TimerEntry<D>; MAX_TIMERS]> {
        std::mem::take(&mut self.entries)
    }

    #[cfg(test)]
    fn deadlines(&self) -> Vec<Monotonic> {
        self.entries.iter().map(|entry| entry.trigger_at).collect()
    }
}

impl<D> Registry<D> {
    /// Register a timer
    ///
    /// An enabled timer first fires `interval` from now. Fails with
    /// [`LoopError::TooManyTimers`] once [`MAX_TIMERS`] timers exist.
    pub fn add_timer(&mut self, timer: Timer<D>) -> Result<TimerId, LoopError> {
        let name = timer.name.clone();
        let interval = timer.interval;
        let now = self.now();
        match self.timers.add(timer, now) {
            Ok(id) => {
                debug!("Added timer {} ({}) with interval {:?}", name, id, interval);
                Ok(id)
            }
            Err(err) => {
                error!("Failed to add timer {}: {}", name, err);
                Err(err)
            }
        }
    }

    /// Remove a timer, running its cleanup hook; unknown ids are ignored
    pub fn remove_timer(&mut self, id: TimerId) {
        if let Some(entry) = self.timers.remove(id) {
            debug!("Removed timer {} ({})", entry.name, id);
            entry.release();
        }
    }

    /// Remove every timer, running cleanup hooks in deadline order
    pub fn remove_all_timers(&mut self) -> usize {
        let entries = self.timers.drain();
        let count = entries.len();
        for entry in entries {
            entry.release();
        }
        count
    }

    /// Arm (`now + interval`) or disarm a timer
    ///
    /// Arming an armed timer restarts its countdown.
    pub fn toggle_timer(&mut self, id: TimerId, enabled: bool) {
        let now = self.now();
        if self.timers.toggle(id, enabled, now) {
            trace!("Timer {} enabled: {}", id, enabled);
        }
    }

    /// Change a timer's interval
    ///
    /// The current deadline is kept; the new interval applies from the next
    /// time the timer is scheduled.
    pub fn change_interval(&mut self, id: TimerId, interval: Duration) {
        if let Some(entry) = self.timers.find_mut(id) {
            entry.interval = interval;
        }
    }

    /// Earliest deadline among enabled timers
    pub fn next_deadline(&self) -> Option<Monotonic> {
        self.timers.next_deadline()
    }

    /// Deadline of a timer (`Monotonic::INFINITE` when disabled)
    pub fn timer_trigger_at(&self, id: TimerId) -> Option<Monotonic> {
        self.timers.find(id).map(|entry| entry.trigger_at)
    }

    /// Interval of a timer
    pub fn timer_interval(&self, id: TimerId) -> Option<Duration> {
        self.timers.find(id).map(|entry| entry.interval)
    }

    /// Whether a timer is armed, `None` if unknown
    pub fn timer_enabled(&self, id: TimerId) -> Option<bool> {
        self.timers
            .find(id)
            .map(|entry| !entry.trigger_at.is_infinite())
    }

    /// Name given at registration
    pub fn timer_name(&self, id: TimerId) -> Option<&str> {
        self.timers.find(id).map(|entry| entry.name.as_str())
    }

    /// Number of registered timers
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Fire every timer due at `now`, in deadline order
    ///
    /// Due timers are captured before any callback runs, so callbacks may
    /// add, remove or reschedule timers freely; each captured timer fires
    /// at most once. Returns the number of callbacks run.
    pub fn dispatch_due(&mut self, now: Monotonic, data: &mut D) -> usize {
        let due = self.timers.capture_due(now);
        let mut dispatched = 0;

        for (id, repeats) in due {
            // Removed by an earlier callback in this pass
            let Some(mut callback) = self.timers.take_callback(id) else {
                continue;
            };
            callback(self, data, id);
            dispatched += 1;
            self.timers.restore_callback(id, callback);

            if !repeats {
                self.remove_timer(id);
            }
        }

        dispatched
    }
}
