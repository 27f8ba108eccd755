//! Event loop core
//!
//! Drives the watch and timer tables from a single owning thread:
//! compute the wait timeout, block in the [`Multiplexer`], then dispatch
//! due timers and ready watches. Other threads interact with the loop only
//! through [`WakeupHandle`] and [`LoopSignal`].

mod registry;
mod timer;
mod watch;

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, log, trace, Level};

use crate::clock::{Clock, SystemClock};
use crate::config::LoopConfig;
use crate::error::LoopError;
use crate::platform::{is_transient, Interest, Multiplexer, PollMultiplexer, WakeupHandle};

pub use registry::Registry;
pub use timer::{Timer, TimerCallback, TimerCleanup, TimerId, MAX_TIMERS};
pub use watch::{Watch, WatchCallback, WatchCleanup, WatchEvent, WatchId, MAX_WATCHES};

/// Name of the wakeup channel's watch
pub const WAKEUP_WATCH_NAME: &str = "wakeup";
/// Name of the primary display watch registered by the builder
pub const DISPLAY_WATCH_NAME: &str = "display";

/// Thread-safe handle to stop or wake a running loop
#[derive(Debug, Clone)]
pub struct LoopSignal {
    stop: Arc<AtomicBool>,
    wakeup: Option<WakeupHandle>,
}

impl LoopSignal {
    /// Ask [`EventLoop::run`] to return after the current tick
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wakeup();
    }

    /// Interrupt a blocked wait
    pub fn wakeup(&self) {
        if let Some(wakeup) = &self.wakeup {
            wakeup.wakeup();
        }
    }
}

/// Builder for [`EventLoop`]
pub struct EventLoopBuilder {
    config: LoopConfig,
    clock: Option<Rc<dyn Clock>>,
    display_fd: Option<i32>,
}

impl EventLoopBuilder {
    /// Start with the default configuration and the system clock
    pub fn new() -> Self {
        Self {
            config: LoopConfig::default(),
            clock: None,
            display_fd: None,
        }
    }

    /// Use the given configuration
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Schedule timers against the given clock
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Rc::new(clock));
        self
    }

    /// Register `fd` as the primary watch, ahead of the wakeup channel
    pub fn display_fd(mut self, fd: i32) -> Self {
        self.display_fd = Some(fd);
        self
    }

    /// Build a loop using the platform poll multiplexer
    pub fn build<D: 'static>(self) -> Result<EventLoop<D>, LoopError> {
        self.build_with(PollMultiplexer::new())
    }

    /// Build a loop using a custom multiplexer
    pub fn build_with<D: 'static, M: Multiplexer>(
        self,
        multiplexer: M,
    ) -> Result<EventLoop<D, M>, LoopError> {
        let clock = self
            .clock
            .unwrap_or_else(|| Rc::new(SystemClock::new()) as Rc<dyn Clock>);
        let mut registry = Registry::new(clock);

        if let Some(fd) = self.display_fd {
            registry.add_watch(Watch::new(DISPLAY_WATCH_NAME, fd, Interest::READABLE))?;
        }

        let wakeup = WakeupHandle::open(self.config.wakeup)?;
        let wakeup_data_read = Rc::new(Cell::new(false));
        let wakeup_watch = registry.add_watch(
            Watch::new(WAKEUP_WATCH_NAME, wakeup.read_fd(), Interest::READABLE).with_callback({
                let wakeup = wakeup.clone();
                let data_read = wakeup_data_read.clone();
                move |_, _, _| {
                    if wakeup.drain() {
                        data_read.set(true);
                    }
                }
            }),
        )?;

        Ok(EventLoop {
            registry,
            multiplexer,
            wakeup: Some(wakeup),
            wakeup_watch: Some(wakeup_watch),
            wakeup_data_read,
            stop: Arc::new(AtomicBool::new(false)),
            running: false,
            config: self.config,
        })
    }
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-threaded watch and timer event loop
///
/// `D` is the state passed mutably to every callback.
pub struct EventLoop<D, M = PollMultiplexer> {
    registry: Registry<D>,
    multiplexer: M,
    wakeup: Option<WakeupHandle>,
    wakeup_watch: Option<WatchId>,
    wakeup_data_read: Rc<Cell<bool>>,
    stop: Arc<AtomicBool>,
    running: bool,
    config: LoopConfig,
}

impl<D: 'static> EventLoop<D> {
    /// Create a loop with the default configuration
    pub fn new() -> Result<Self, LoopError> {
        EventLoopBuilder::new().build()
    }

    /// Create a loop with the given configuration
    pub fn with_config(config: LoopConfig) -> Result<Self, LoopError> {
        EventLoopBuilder::new().config(config).build()
    }
}

impl<D, M: Multiplexer> EventLoop<D, M> {
    /// Run one wait/dispatch cycle
    ///
    /// `timeout` of `None` blocks until something happens; the wait is
    /// always cut short by the earliest enabled timer. Returns whether the
    /// primary (first registered) watch became ready.
    pub fn tick(&mut self, timeout: Option<Duration>, data: &mut D) -> Result<bool, LoopError> {
        self.wakeup_data_read.set(false);
        self.registry.watches.clear_ready();

        let mut timeout = self.registry.compute_timeout(timeout);
        let deadline = timeout.map(|timeout| self.registry.now().saturating_add(timeout));
        log!(self.tick_level(), "Tick timeout: {:?}", timeout);

        loop {
            self.registry.watches.clear_revents();
            let ready = match self
                .multiplexer
                .wait(self.registry.watches.descriptors_mut(), timeout)
            {
                Ok(count) => Some(count),
                Err(err) if is_transient(err) => {
                    trace!("Wait interrupted: {}", err);
                    None
                }
                Err(err) => {
                    error!("Failed to wait for events: {}", err);
                    return Err(LoopError::Wait(err));
                }
            };

            let now = self.registry.now();
            let fired = self.registry.dispatch_due(now, data);
            if fired > 0 {
                log!(self.tick_level(), "Dispatched {} timers", fired);
            }

            match ready {
                Some(0) => return Ok(false),
                Some(_) => return Ok(self.registry.dispatch_ready(data)),
                None => {}
            }

            // Interrupted: retry with whatever is left of the budget
            let remaining = match deadline {
                Some(deadline) => {
                    let now = self.registry.now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    Some(now.duration_until(deadline))
                }
                None => None,
            };
            timeout = self.registry.compute_timeout(remaining);
        }
    }

    /// Dispatch whatever is ready right now without blocking
    pub fn dispatch_pending(&mut self, data: &mut D) -> Result<bool, LoopError> {
        self.tick(Some(Duration::ZERO), data)
    }

    /// Tick until stopped through a [`LoopSignal`]
    ///
    /// `per_tick` runs after every tick. A stop requested before `run` is
    /// called is discarded.
    pub fn run<F>(&mut self, data: &mut D, mut per_tick: F) -> Result<(), LoopError>
    where
        F: FnMut(&mut Registry<D>, &mut D),
    {
        self.stop.store(false, Ordering::SeqCst);
        self.running = true;
        debug!("Starting event loop");

        let result = loop {
            if self.stop.load(Ordering::SeqCst) {
                break Ok(());
            }
            if let Err(e) = self.tick(None, data) {
                error!("Event loop error: {}", e);
                break Err(e);
            }
            per_tick(&mut self.registry, data);
        };

        self.running = false;
        debug!("Event loop stopped");
        result
    }

    fn tick_level(&self) -> Level {
        if self.config.debug_ticks {
            Level::Debug
        } else {
            Level::Trace
        }
    }
}

impl<D, M> EventLoop<D, M> {
    /// Watch and timer registry
    pub fn registry(&self) -> &Registry<D> {
        &self.registry
    }

    /// Mutable watch and timer registry
    pub fn registry_mut(&mut self) -> &mut Registry<D> {
        &mut self.registry
    }

    /// Handle for stopping or waking the loop from any thread
    pub fn signal(&self) -> LoopSignal {
        LoopSignal {
            stop: self.stop.clone(),
            wakeup: self.wakeup.clone(),
        }
    }

    /// Handle for waking the loop from any thread, `None` after teardown
    pub fn wakeup_handle(&self) -> Option<WakeupHandle> {
        self.wakeup.clone()
    }

    /// Interrupt a blocked wait
    pub fn wakeup(&self) {
        if let Some(wakeup) = &self.wakeup {
            wakeup.wakeup();
        }
    }

    /// Ask [`EventLoop::run`] to return after the current tick
    pub fn stop(&self) {
        self.signal().stop();
    }

    /// Whether [`EventLoop::run`] is executing
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the wakeup watch was ready in the last tick
    pub fn wakeup_ready(&self) -> bool {
        self.wakeup_watch
            .is_some_and(|id| self.registry.watch_ready(id))
    }

    /// Whether the last tick (or explicit drain) read wakeup data
    pub fn wakeup_data_read(&self) -> bool {
        self.wakeup_data_read.get()
    }

    /// Drain the wakeup channel now; returns whether anything was pending
    pub fn check_for_wakeup_events(&mut self) -> bool {
        let read = self.wakeup.as_ref().is_some_and(WakeupHandle::drain);
        self.wakeup_data_read.set(read);
        read
    }

    /// Id of the wakeup channel's watch
    pub fn wakeup_watch(&self) -> Option<WatchId> {
        self.wakeup_watch
    }

    /// The multiplexer used for waiting
    pub fn multiplexer(&self) -> &M {
        &self.multiplexer
    }

    /// Release every timer, every watch and the wakeup channel
    ///
    /// Each cleanup hook runs exactly once. Safe to call more than once;
    /// also run on drop.
    pub fn teardown(&mut self) {
        if self.wakeup.is_none() && self.registry.watch_count() == 0 && self.registry.timer_count() == 0 {
            return;
        }

        let timers = self.registry.remove_all_timers();
        let watches = self.registry.remove_all_watches();
        self.wakeup_watch = None;
        self.wakeup = None;

        debug!(
            "Event loop torn down, released {} timers and {} watches",
            timers, watches
        );
    }
}

impl<D, M> Deref for EventLoop<D, M> {
    type Target = Registry<D>;

    fn deref(&self) -> &Registry<D> {
        &self.registry
    }
}

impl<D, M> DerefMut for EventLoop<D, M> {
    fn deref_mut(&mut self) -> &mut Registry<D> {
        &mut self.registry
    }
}

impl<D, M> Drop for EventLoop<D, M> {
    fn drop(&mut self) {
        self.teardown();
    }
}
