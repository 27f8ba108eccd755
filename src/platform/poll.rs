//! `poll(2)` based multiplexer
//!
//! Uses `rustix::event::poll`, which is `ppoll` with a nanosecond timeout on
//! Linux and millisecond-rounded `poll` elsewhere.

use std::os::fd::BorrowedFd;
use std::time::Duration;

use rustix::event::{PollFd, PollFlags};
use rustix::time::Timespec;
use smallvec::SmallVec;

use super::{Interest, Multiplexer, PollDescriptor};
use crate::event_loop::MAX_WATCHES;

/// Multiplexer backed by the platform `poll` call
#[derive(Debug, Default)]
pub struct PollMultiplexer {
    _private: (),
}

impl PollMultiplexer {
    /// Create a new poll multiplexer
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_timespec(timeout: Duration) -> Timespec {
    Timespec {
        tv_sec: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        tv_nsec: timeout.subsec_nanos() as _,
    }
}

impl Multiplexer for PollMultiplexer {
    fn wait(
        &mut self,
        descriptors: &mut [PollDescriptor],
        timeout: Option<Duration>,
    ) -> rustix::io::Result<usize> {
        let mut fds: SmallVec<[PollFd<'_>; MAX_WATCHES]> = descriptors
            .iter()
            .map(|descriptor| {
                // SAFETY: a watch's descriptor stays open for as long as the
                // watch is registered, and the registry cannot change while
                // we hold `descriptors`.
                let fd = unsafe { BorrowedFd::borrow_raw(descriptor.fd) };
                PollFd::from_borrowed_fd(fd, PollFlags::from_bits_retain(descriptor.events.bits()))
            })
            .collect();

        let timespec = timeout.map(to_timespec);
        let ready = rustix::event::poll(&mut fds, timespec.as_ref())?;

        for (descriptor, fd) in descriptors.iter_mut().zip(fds.iter()) {
            descriptor.revents = Interest::from_bits_retain(fd.revents().bits());
        }

        Ok(ready)
    }
}
