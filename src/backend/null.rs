//! Null backend
//!
//! A backend with no display connection. It drives the event loop core
//! exactly like the windowing backends do, so the wakeup channel is its
//! primary watch.

use std::time::Duration;

use log::{debug, error};

use crate::config::LoopConfig;
use crate::error::LoopError;
use crate::event_loop::{EventLoop, EventLoopBuilder, LoopSignal, Registry};

/// Event loop wrapper for the null backend
pub struct NullBackend<D: 'static> {
    /// The loop core
    event_loop: EventLoop<D>,
}

impl<D: 'static> NullBackend<D> {
    /// Create a backend configured from the environment
    pub fn new() -> Result<Self, LoopError> {
        Self::with_config(LoopConfig::from_env()?)
    }

    /// Create a backend with an explicit configuration
    pub fn with_config(config: LoopConfig) -> Result<Self, LoopError> {
        let event_loop = EventLoopBuilder::new().config(config).build()?;
        debug!("Null backend initialized");
        Ok(Self { event_loop })
    }

    /// Get the registry to add watches and timers
    pub fn registry(&mut self) -> &mut Registry<D> {
        self.event_loop.registry_mut()
    }

    /// Get the underlying event loop
    pub fn event_loop(&mut self) -> &mut EventLoop<D> {
        &mut self.event_loop
    }

    /// Get the loop signal for waking/stopping
    pub fn signal(&self) -> LoopSignal {
        self.event_loop.signal()
    }

    /// Process pending events without blocking
    pub fn poll_events(&mut self, data: &mut D) -> Result<(), LoopError> {
        self.event_loop.dispatch_pending(data)?;
        Ok(())
    }

    /// Block until an event or timer arrives
    pub fn wait_events(&mut self, data: &mut D) -> Result<(), LoopError> {
        self.event_loop.tick(None, data)?;
        Ok(())
    }

    /// Block until an event or timer arrives, or `timeout` elapses
    pub fn wait_events_timeout(&mut self, timeout: Duration, data: &mut D) -> Result<(), LoopError> {
        self.event_loop.tick(Some(timeout), data)?;
        Ok(())
    }

    /// Wake a thread blocked in one of the wait calls
    pub fn post_empty_event(&self) {
        self.event_loop.wakeup();
    }

    /// Run the event loop until stopped, calling `tick` after each wait
    pub fn run_main_loop<F>(&mut self, data: &mut D, tick: F) -> Result<(), LoopError>
    where
        F: FnMut(&mut Registry<D>, &mut D),
    {
        debug!("Starting null backend main loop");
        self.event_loop.run(data, tick).inspect_err(|e| {
            error!("Null backend main loop failed: {}", e);
        })
    }

    /// Stop the main loop
    pub fn stop_main_loop(&self) {
        self.event_loop.stop();
    }
}
