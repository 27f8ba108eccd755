//! File descriptor watches
//!
//! A watch pairs a descriptor and an [`Interest`] mask with a callback. The
//! table holds at most [`MAX_WATCHES`] entries and keeps the poll descriptor
//! array in lockstep with it: same count, same index.

use std::fmt;
use std::num::NonZeroU64;
use std::os::fd::RawFd;

use log::{debug, error};
use smallvec::SmallVec;

use super::Registry;
use crate::error::LoopError;
use crate::platform::{Interest, PollDescriptor};

/// Maximum number of simultaneous watches, including the wakeup watch
pub const MAX_WATCHES: usize = 32;

/// Unique identifier for watches, never reused within a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(NonZeroU64);

impl WatchId {
    /// Raw identifier value (never zero)
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// Readiness delivered to a watch callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEvent {
    /// Watch that became ready
    pub id: WatchId,
    /// Its descriptor
    pub fd: RawFd,
    /// Raw events returned by the wait
    pub readiness: Interest,
}

/// Watch callback: receives the registry, the loop data and the event
pub type WatchCallback<D> = Box<dyn FnMut(&mut Registry<D>, &mut D, WatchEvent)>;

/// Cleanup hook run exactly once when a watch is removed
pub type WatchCleanup = Box<dyn FnOnce(WatchId)>;

/// Watch registration request
pub struct Watch<D> {
    name: String,
    fd: RawFd,
    interest: Interest,
    enabled: bool,
    callback: Option<WatchCallback<D>>,
    cleanup: Option<WatchCleanup>,
}

impl<D> Watch<D> {
    /// Create an enabled watch with no callback
    pub fn new(name: impl Into<String>, fd: RawFd, interest: Interest) -> Self {
        Self {
            name: name.into(),
            fd,
            interest,
            enabled: true,
            callback: None,
            cleanup: None,
        }
    }

    /// Set the callback run when the descriptor becomes ready
    pub fn with_callback(
        mut self,
        callback: impl FnMut(&mut Registry<D>, &mut D, WatchEvent) + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Register the watch enabled or disabled
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set a hook run when the watch is removed
    pub fn on_cleanup(mut self, cleanup: impl FnOnce(WatchId) + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

struct WatchEntry<D> {
    id: WatchId,
    name: String,
    fd: RawFd,
    interest: Interest,
    enabled: bool,
    ready: bool,
    /// Taken out while the callback runs
    callback: Option<WatchCallback<D>>,
    cleanup: Option<WatchCleanup>,
}

impl<D> WatchEntry<D> {
    fn descriptor(&self) -> PollDescriptor {
        let events = if self.enabled {
            self.interest
        } else {
            Interest::empty()
        };
        PollDescriptor::new(self.fd, events)
    }

    fn release(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup(self.id);
        }
    }
}

pub(crate) type ReadyWatches = SmallVec<[(WatchId, RawFd, Interest); MAX_WATCHES]>;

/// Bounded watch table with its parallel poll descriptor array
pub(crate) struct WatchTable<D> {
    entries: SmallVec<[WatchEntry<D>; MAX_WATCHES]>,
    descriptors: SmallVec<[PollDescriptor; MAX_WATCHES]>,
    next_id: NonZeroU64,
}

impl<D> WatchTable<D> {
    pub(crate) fn new() -> Self {
        Self {
            entries: SmallVec::new(),
            descriptors: SmallVec::new(),
            next_id: NonZeroU64::MIN,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn find(&self, id: WatchId) -> Option<&WatchEntry<D>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    fn find_mut(&mut self, id: WatchId) -> Option<&mut WatchEntry<D>> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    fn add(&mut self, watch: Watch<D>) -> Result<WatchId, LoopError> {
        if watch.fd < 0 {
            return Err(LoopError::InvalidFd(watch.fd));
        }
        if self.entries.len() >= MAX_WATCHES {
            return Err(LoopError::TooManyWatches { limit: MAX_WATCHES });
        }

        let id = WatchId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        self.entries.push(WatchEntry {
            id,
            name: watch.name,
            fd: watch.fd,
            interest: watch.interest,
            enabled: watch.enabled,
            ready: false,
            callback: watch.callback,
            cleanup: watch.cleanup,
        });
        if let Some(entry) = self.entries.last() {
            self.descriptors.push(entry.descriptor());
        }

        Ok(id)
    }

    fn remove(&mut self, id: WatchId) -> Option<WatchEntry<D>> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        // `remove` shifts the tail down, keeping registration order; the
        // returned events of the remaining watches move with them
        self.descriptors.remove(index);
        Some(self.entries.remove(index))
    }

    fn toggle(&mut self, id: WatchId, enabled: bool) -> bool {
        let Some(index) = self.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = &mut self.entries[index];
        if entry.enabled == enabled {
            return false;
        }

        entry.enabled = enabled;
        // Only the request mask changes; events returned by the last wait stay
        self.descriptors[index].events = entry.descriptor().events;
        true
    }

    #[cfg(test)]
    pub(crate) fn descriptors(&self) -> &[PollDescriptor] {
        &self.descriptors
    }

    pub(crate) fn descriptors_mut(&mut self) -> &mut [PollDescriptor] {
        &mut self.descriptors
    }

    pub(crate) fn clear_revents(&mut self) {
        for descriptor in self.descriptors.iter_mut() {
            descriptor.revents = Interest::empty();
        }
    }

    pub(crate) fn clear_ready(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.ready = false;
        }
    }

    /// Update ready flags from the last wait and capture the ready watches
    pub(crate) fn capture_ready(&mut self) -> ReadyWatches {
        let mut ready = ReadyWatches::new();
        for (entry, descriptor) in self.entries.iter_mut().zip(self.descriptors.iter()) {
            // Disabled watches are never dispatched, even for returned-only events
            entry.ready = entry.enabled && descriptor.revents.intersects(entry.interest);
            if entry.ready {
                ready.push((entry.id, entry.fd, descriptor.revents));
            }
        }
        ready
    }

    fn primary_ready(&self) -> bool {
        self.entries.first().is_some_and(|entry| entry.ready)
    }

    fn take_callback(&mut self, id: WatchId) -> Option<WatchCallback<D>> {
        self.find_mut(id)?.callback.take()
    }

    fn restore_callback(&mut self, id: WatchId, callback: WatchCallback<D>) {
        if let Some(entry) = self.find_mut(id) {
            if entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }

    fn drain(&mut self) -> SmallVec<[WatchEntry<D>; MAX_WATCHES]> {
        let entries = std::mem::take(&mut self.entries);
        self.descriptors.clear();
        entries
    }
}

impl<D> Registry<D> {
    /// Register a watch
    ///
    /// Fails with [`LoopError::TooManyWatches`] once [`MAX_WATCHES`] watches
    /// exist; the table is left untouched in that case.
    pub fn add_watch(&mut self, watch: Watch<D>) -> Result<WatchId, LoopError> {
        let name = watch.name.clone();
        let fd = watch.fd;
        match self.watches.add(watch) {
            Ok(id) => {
                debug!("Added watch {} ({}) on fd {}", name, id, fd);
                Ok(id)
            }
            Err(err) => {
                error!("Failed to add watch {}: {}", name, err);
                Err(err)
            }
        }
    }

    /// Remove a watch, running its cleanup hook; unknown ids are ignored
    pub fn remove_watch(&mut self, id: WatchId) {
        if let Some(entry) = self.watches.remove(id) {
            debug!("Removed watch {} ({})", entry.name, id);
            entry.release();
        }
    }

    /// Enable or disable a watch without removing it
    pub fn toggle_watch(&mut self, id: WatchId, enabled: bool) {
        if self.watches.toggle(id, enabled) {
            debug!("Watch {} enabled: {}", id, enabled);
        }
    }

    /// Whether the watch was ready in the last dispatch
    pub fn watch_ready(&self, id: WatchId) -> bool {
        self.watches.find(id).is_some_and(|entry| entry.ready)
    }

    /// Whether the watch is enabled, `None` if unknown
    pub fn watch_enabled(&self, id: WatchId) -> Option<bool> {
        self.watches.find(id).map(|entry| entry.enabled)
    }

    /// Name given at registration
    pub fn watch_name(&self, id: WatchId) -> Option<&str> {
        self.watches.find(id).map(|entry| entry.name.as_str())
    }

    /// Number of registered watches
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Registered watch ids in dispatch order
    pub fn watch_ids(&self) -> impl Iterator<Item = WatchId> + '_ {
        self.watches.entries.iter().map(|entry| entry.id)
    }

    /// Run callbacks of watches whose returned events match their interest
    ///
    /// Returns whether the primary (first) watch was ready.
    pub(crate) fn dispatch_ready(&mut self, data: &mut D) -> bool {
        let ready = self.watches.capture_ready();
        let primary = self.watches.primary_ready();

        for (id, fd, readiness) in ready {
            // Removed by an earlier callback in this pass, or has no callback
            let Some(mut callback) = self.watches.take_callback(id) else {
                continue;
            };
            callback(self, data, WatchEvent { id, fd, readiness });
            self.watches.restore_callback(id, callback);
        }

        primary
    }

    /// Remove every watch, running cleanup hooks in registration order
    pub(crate) fn remove_all_watches(&mut self) -> usize {
        let entries = self.watches.drain();
        let count = entries.len();
        for entry in entries {
            entry.release();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::registry::test_registry;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(WatchId, Interest)>>>;

    fn recording_watch(name: &str, fd: RawFd, log: &Log) -> Watch<()> {
        let log = log.clone();
        Watch::new(name, fd, Interest::READABLE)
            .with_callback(move |_, _, event| log.borrow_mut().push((event.id, event.readiness)))
    }

    #[test]
    fn test_watch_ids_unique_and_increasing() {
        let (mut registry, _clock) = test_registry::<()>();
        let a = registry.add_watch(Watch::new("a", 3, Interest::READABLE)).unwrap();
        let b = registry.add_watch(Watch::new("b", 4, Interest::READABLE)).unwrap();
        registry.remove_watch(b);
        let c = registry.add_watch(Watch::new("c", 5, Interest::READABLE)).unwrap();

        assert_ne!(a.get(), 0);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_descriptors_follow_table() {
        let (mut registry, _clock) = test_registry::<()>();
        let a = registry.add_watch(Watch::new("a", 3, Interest::READABLE)).unwrap();
        let b = registry
            .add_watch(Watch::new("b", 4, Interest::WRITABLE).enabled(false))
            .unwrap();
        let c = registry.add_watch(Watch::new("c", 5, Interest::READABLE)).unwrap();

        let fds: Vec<_> = registry.watches.descriptors().iter().map(|d| (d.fd, d.events)).collect();
        assert_eq!(
            fds,
            vec![(3, Interest::READABLE), (4, Interest::empty()), (5, Interest::READABLE)]
        );

        registry.toggle_watch(b, true);
        assert_eq!(registry.watches.descriptors()[1].events, Interest::WRITABLE);

        registry.remove_watch(a);
        let fds: Vec<_> = registry.watches.descriptors().iter().map(|d| d.fd).collect();
        assert_eq!(fds, vec![4, 5]);
        assert_eq!(registry.watch_ids().collect::<Vec<_>>(), vec![b, c]);
    }

    #[test]
    fn test_returned_events_survive_table_edits() {
        let (mut registry, _clock) = test_registry::<()>();
        let log = Log::default();
        let a = registry.add_watch(recording_watch("a", 3, &log)).unwrap();
        let b = registry.add_watch(recording_watch("b", 4, &log)).unwrap();
        let c = registry.add_watch(recording_watch("c", 5, &log)).unwrap();
        let idle = registry
            .add_watch(Watch::new("idle", 6, Interest::READABLE).enabled(false))
            .unwrap();

        for descriptor in registry.watches.descriptors_mut() {
            descriptor.revents = Interest::READABLE;
        }

        // Edits between the wait and the dispatch, as a timer callback would do
        registry.toggle_watch(idle, true);
        registry.remove_watch(b);
        registry.add_watch(Watch::new("late", 7, Interest::READABLE)).unwrap();

        let revents: Vec<_> = registry.watches.descriptors().iter().map(|d| (d.fd, d.revents)).collect();
        assert_eq!(
            revents,
            vec![
                (3, Interest::READABLE),
                (5, Interest::READABLE),
                (6, Interest::READABLE),
                (7, Interest::empty()),
            ]
        );

        assert!(registry.dispatch_ready(&mut ()));
        assert_eq!(
            *log.borrow(),
            vec![(a, Interest::READABLE), (c, Interest::READABLE)]
        );
    }

    #[test]
    fn test_disabled_watch_not_dispatched() {
        let (mut registry, _clock) = test_registry::<()>();
        let log = Log::default();
        let a = registry.add_watch(recording_watch("a", 3, &log)).unwrap();

        registry.watches.descriptors_mut()[0].revents = Interest::READABLE;
        registry.toggle_watch(a, false);

        assert!(!registry.dispatch_ready(&mut ()));
        assert!(log.borrow().is_empty());
        assert!(!registry.watch_ready(a));
    }

    #[test]
    fn test_toggle_keeps_position() {
        let (mut registry, _clock) = test_registry::<()>();
        let a = registry.add_watch(Watch::new("a", 3, Interest::READABLE)).unwrap();
        let b = registry.add_watch(Watch::new("b", 4, Interest::READABLE)).unwrap();

        registry.toggle_watch(a, false);
        registry.toggle_watch(a, false);
        assert_eq!(registry.watch_enabled(a), Some(false));
        assert_eq!(registry.watch_ids().collect::<Vec<_>>(), vec![a, b]);

        registry.toggle_watch(a, true);
        assert_eq!(registry.watch_enabled(a), Some(true));
    }

    #[test]
    fn test_capacity_boundary() {
        let (mut registry, _clock) = test_registry::<()>();
        for i in 0..MAX_WATCHES {
            registry
                .add_watch(Watch::new(format!("w{i}"), 3, Interest::READABLE))
                .unwrap();
        }

        let err = registry.add_watch(Watch::new("extra", 3, Interest::READABLE));
        assert_eq!(err, Err(LoopError::TooManyWatches { limit: MAX_WATCHES }));
        assert_eq!(registry.watch_count(), MAX_WATCHES);
        assert_eq!(registry.watches.descriptors().len(), MAX_WATCHES);
    }

    #[test]
    fn test_negative_fd_rejected() {
        let (mut registry, _clock) = test_registry::<()>();
        let err = registry.add_watch(Watch::new("bad", -1, Interest::READABLE));
        assert_eq!(err, Err(LoopError::InvalidFd(-1)));
        assert_eq!(registry.watch_count(), 0);
    }

    #[test]
    fn test_cleanup_runs_once_on_remove() {
        let (mut registry, _clock) = test_registry::<()>();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let id = registry
            .add_watch(Watch::new("a", 3, Interest::READABLE).on_cleanup(move |_| {
                counter.set(counter.get() + 1)
            }))
            .unwrap();

        registry.remove_watch(id);
        assert_eq!(calls.get(), 1);

        // Unknown id is a no-op
        registry.remove_watch(id);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let (mut registry, _clock) = test_registry::<()>();
        let log = Log::default();
        let a = registry.add_watch(recording_watch("a", 3, &log)).unwrap();
        let b = registry.add_watch(recording_watch("b", 4, &log)).unwrap();
        let c = registry.add_watch(recording_watch("c", 5, &log)).unwrap();

        let descriptors = registry.watches.descriptors_mut();
        descriptors[2].revents = Interest::READABLE;
        descriptors[0].revents = Interest::READABLE | Interest::HANGUP;
        descriptors[1].revents = Interest::WRITABLE;

        let primary = registry.dispatch_ready(&mut ());
        assert!(primary);
        assert_eq!(
            *log.borrow(),
            vec![(a, Interest::READABLE | Interest::HANGUP), (c, Interest::READABLE)]
        );
        assert!(registry.watch_ready(a));
        assert!(!registry.watch_ready(b));
        assert!(registry.watch_ready(c));
    }

    #[test]
    fn test_callback_may_remove_other_watch() {
        let (mut registry, _clock) = test_registry::<()>();
        let log = Log::default();
        let victim = Rc::new(Cell::new(None));

        let target = victim.clone();
        let first = registry
            .add_watch(Watch::new("first", 3, Interest::READABLE).with_callback(
                move |registry: &mut Registry<()>, _, _| {
                    if let Some(id) = target.get() {
                        registry.remove_watch(id);
                    }
                },
            ))
            .unwrap();
        let second = registry.add_watch(recording_watch("second", 4, &log)).unwrap();
        victim.set(Some(second));

        for descriptor in registry.watches.descriptors_mut() {
            descriptor.revents = Interest::READABLE;
        }
        registry.dispatch_ready(&mut ());

        assert!(log.borrow().is_empty());
        assert_eq!(registry.watch_ids().collect::<Vec<_>>(), vec![first]);
    }

    #[test]
    fn test_callback_may_remove_itself() {
        let (mut registry, _clock) = test_registry::<u32>();
        let cleaned = Rc::new(Cell::new(false));
        let flag = cleaned.clone();
        registry
            .add_watch(
                Watch::new("once", 3, Interest::READABLE)
                    .with_callback(|registry: &mut Registry<u32>, count: &mut u32, event| {
                        *count += 1;
                        registry.remove_watch(event.id);
                    })
                    .on_cleanup(move |_| flag.set(true)),
            )
            .unwrap();

        let mut count = 0;
        registry.watches.descriptors_mut()[0].revents = Interest::READABLE;
        registry.dispatch_ready(&mut count);

        assert_eq!(count, 1);
        assert!(cleaned.get());
        assert_eq!(registry.watch_count(), 0);
    }

    #[test]
    fn test_remove_all_watches_runs_cleanups() {
        let (mut registry, _clock) = test_registry::<()>();
        let order = Rc::new(RefCell::new(Vec::new()));
        for fd in 3..6 {
            let order = order.clone();
            registry
                .add_watch(Watch::new("w", fd, Interest::READABLE).on_cleanup(move |id| {
                    order.borrow_mut().push(id.get())
                }))
                .unwrap();
        }

        assert_eq!(registry.remove_all_watches(), 3);
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
        assert_eq!(registry.watch_count(), 0);
        assert!(registry.watches.descriptors().is_empty());
    }
}
