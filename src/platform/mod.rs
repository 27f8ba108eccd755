//! Platform primitives
//!
//! This module contains the OS-facing pieces of the event loop:
//! - The [`Multiplexer`] abstraction over the blocking wait call
//! - A `poll(2)`/`ppoll(2)` implementation of it
//! - The cross-thread wakeup channel (eventfd or pipe)

pub mod poll;
pub mod wakeup;

use std::os::fd::RawFd;
use std::time::Duration;

use rustix::event::PollFlags;

pub use poll::PollMultiplexer;
pub use wakeup::WakeupHandle;

// Readiness bits, identical to the platform poll bits
bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Interest: u16 {
        /// Data available to read
        const READABLE = PollFlags::IN.bits();
        /// Urgent data available
        const PRIORITY = PollFlags::PRI.bits();
        /// Writing will not block
        const WRITABLE = PollFlags::OUT.bits();
        /// Error condition (returned only)
        const ERROR = PollFlags::ERR.bits();
        /// Peer hung up (returned only)
        const HANGUP = PollFlags::HUP.bits();
        /// Descriptor not open (returned only)
        const INVALID = PollFlags::NVAL.bits();
    }
}

/// One entry of the poll descriptor array
///
/// The event loop keeps one of these per watch, at the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDescriptor {
    /// Watched descriptor
    pub fd: RawFd,
    /// Requested events (empty while the watch is disabled)
    pub events: Interest,
    /// Events reported by the last wait
    pub revents: Interest,
}

impl PollDescriptor {
    /// Create a descriptor with no returned events
    pub fn new(fd: RawFd, events: Interest) -> Self {
        Self {
            fd,
            events,
            revents: Interest::empty(),
        }
    }
}

/// Blocking wait-for-readiness primitive
///
/// Implementations fill in `revents` for every descriptor and return the
/// number of descriptors with non-empty `revents`, like `poll(2)`.
pub trait Multiplexer {
    /// Wait until a descriptor is ready or `timeout` elapses (`None` waits forever)
    fn wait(
        &mut self,
        descriptors: &mut [PollDescriptor],
        timeout: Option<Duration>,
    ) -> rustix::io::Result<usize>;
}

/// Whether a failed wait should simply be retried
pub fn is_transient(err: rustix::io::Errno) -> bool {
    err == rustix::io::Errno::INTR || err == rustix::io::Errno::AGAIN
}
