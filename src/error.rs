//! Event loop errors

use rustix::io::Errno;

/// Errors reported by the event loop core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    #[error("Too many watches added (limit is {limit})")]
    TooManyWatches { limit: usize },
    #[error("Too many timers added (limit is {limit})")]
    TooManyTimers { limit: usize },
    #[error("Invalid file descriptor {0}")]
    InvalidFd(i32),
    #[error("Failed to wait for events: {0}")]
    Wait(Errno),
    #[error("Failed to create wakeup channel: {0}")]
    Wakeup(Errno),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LoopError {
    /// Whether the error is a capacity limit that clears once entries are removed
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            LoopError::TooManyWatches { .. } | LoopError::TooManyTimers { .. }
        )
    }
}
