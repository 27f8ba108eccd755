//! Cross-thread wakeup channel
//!
//! A [`WakeupHandle`] wraps an eventfd counter (Linux/Android) or a
//! non-blocking pipe. The event loop watches the read side; any thread may
//! call [`WakeupHandle::wakeup`] to make a blocked wait return.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

use log::{debug, warn};
use rustix::io::Errno;

use crate::config::WakeupKind;
use crate::error::LoopError;

#[derive(Debug)]
struct WakeupFds {
    read: OwnedFd,
    /// Separate write end; `None` when read and write share one eventfd
    write: Option<OwnedFd>,
}

impl WakeupFds {
    fn write_fd(&self) -> BorrowedFd<'_> {
        match &self.write {
            Some(write) => write.as_fd(),
            None => self.read.as_fd(),
        }
    }
}

/// Cloneable, thread-safe handle to the wakeup channel
///
/// The descriptors are closed once the event loop and every handle
/// have been dropped.
#[derive(Debug, Clone)]
pub struct WakeupHandle {
    fds: Arc<WakeupFds>,
    kind: WakeupKind,
}

impl WakeupHandle {
    /// Open a wakeup channel of the given kind (`Auto` is resolved first)
    pub fn open(kind: WakeupKind) -> Result<Self, LoopError> {
        let kind = kind.resolve()?;
        let fds = match kind {
            WakeupKind::EventFd => open_eventfd(),
            _ => open_pipe(),
        }
        .map_err(LoopError::Wakeup)?;

        debug!(
            "Opened {:?} wakeup channel (fd {})",
            kind,
            fds.read.as_raw_fd()
        );

        Ok(Self {
            fds: Arc::new(fds),
            kind,
        })
    }

    /// Concrete primitive backing this channel
    pub fn kind(&self) -> WakeupKind {
        self.kind
    }

    /// Descriptor the event loop watches
    pub fn read_fd(&self) -> RawFd {
        self.fds.read.as_raw_fd()
    }

    /// Interrupt a blocked wait; never blocks
    ///
    /// A full pipe or saturated counter already guarantees a pending
    /// wakeup, so `EAGAIN` is treated as success.
    pub fn wakeup(&self) {
        let counter = 1u64.to_ne_bytes();
        let payload: &[u8] = match self.kind {
            WakeupKind::EventFd => &counter,
            _ => b"w",
        };

        loop {
            match rustix::io::write(self.fds.write_fd(), payload) {
                Ok(_) | Err(Errno::AGAIN) => break,
                Err(Errno::INTR) => continue,
                Err(err) => {
                    warn!("Failed to signal wakeup channel: {}", err);
                    break;
                }
            }
        }
    }

    /// Read everything pending without blocking; returns whether anything was read
    pub fn drain(&self) -> bool {
        let mut buf = [0u8; 64];
        let mut read_any = false;

        loop {
            match rustix::io::read(self.fds.read.as_fd(), &mut buf[..]) {
                Ok(0) => break,
                Ok(_) => read_any = true,
                Err(Errno::INTR) => continue,
                Err(_) => break,
            }
        }

        read_any
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_eventfd() -> rustix::io::Result<WakeupFds> {
    use rustix::event::{eventfd, EventfdFlags};

    let fd = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?;
    Ok(WakeupFds {
        read: fd,
        write: None,
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn open_eventfd() -> rustix::io::Result<WakeupFds> {
    Err(Errno::NOSYS)
}

fn open_pipe() -> rustix::io::Result<WakeupFds> {
    use rustix::fs::{fcntl_getfl, fcntl_setfl, OFlags};
    use rustix::io::{fcntl_setfd, FdFlags};

    let (read, write) = rustix::pipe::pipe()?;
    for fd in [&read, &write] {
        fcntl_setfd(fd, FdFlags::CLOEXEC)?;
        let flags = fcntl_getfl(fd)?;
        fcntl_setfl(fd, flags | OFlags::NONBLOCK)?;
    }

    Ok(WakeupFds {
        read,
        write: Some(write),
    })
}
