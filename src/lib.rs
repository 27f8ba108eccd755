//! Tickloop - A single-threaded watch and timer event loop
//!
//! Tickloop is the event loop core shared by windowing backends: a small
//! table of file descriptor watches, a deadline-sorted timer table and a
//! wakeup channel other threads can use to interrupt a blocked wait.
//!
//! # Architecture
//!
//! - **Platform Layer**: `poll(2)` multiplexer and eventfd/pipe wakeup channel
//! - **Event Loop Core**: Watch and timer registries, the tick cycle
//! - **Backends**: Loop wrappers used by windowing backends, key repeat
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tickloop::{EventLoop, Timer};
//!
//! let mut event_loop = EventLoop::<u32>::new()?;
//! event_loop.add_timer(
//!     Timer::new("tick", Duration::from_millis(100), |_, count: &mut u32, _| *count += 1)
//!         .repeating(true),
//! )?;
//!
//! let mut count = 0;
//! event_loop.tick(None, &mut count)?;
//! # Ok::<(), tickloop::LoopError>(())
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod platform;

pub use clock::{Clock, ManualClock, Monotonic, SystemClock};
pub use config::{LoopConfig, WakeupKind};
pub use error::LoopError;
pub use event_loop::{
    EventLoop, EventLoopBuilder, LoopSignal, Registry, Timer, TimerId, Watch, WatchEvent, WatchId,
};
pub use platform::{Interest, WakeupHandle};
