//! Event loop configuration
//!
//! Configuration is small: which OS primitive backs the wakeup channel and
//! whether every tick logs its computed timeout at debug level. Both can be
//! overridden from the environment (`TICKLOOP_WAKEUP`, `TICKLOOP_DEBUG`).

use std::str::FromStr;

use crate::error::LoopError;

/// Environment variable selecting the wakeup primitive
pub const WAKEUP_ENV: &str = "TICKLOOP_WAKEUP";
/// Environment variable enabling per-tick debug logging
pub const DEBUG_ENV: &str = "TICKLOOP_DEBUG";

/// OS primitive used for the cross-thread wakeup channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WakeupKind {
    /// eventfd where available, otherwise a pipe
    #[default]
    Auto,
    /// Linux eventfd counter
    EventFd,
    /// Non-blocking pipe
    Pipe,
}

impl WakeupKind {
    /// Resolve `Auto` to the concrete primitive for this platform
    pub fn resolve(self) -> Result<WakeupKind, LoopError> {
        match self {
            WakeupKind::Auto if cfg!(any(target_os = "linux", target_os = "android")) => {
                Ok(WakeupKind::EventFd)
            }
            WakeupKind::Auto => Ok(WakeupKind::Pipe),
            WakeupKind::EventFd if !cfg!(any(target_os = "linux", target_os = "android")) => Err(
                LoopError::InvalidConfig("eventfd is not available on this platform".into()),
            ),
            other => Ok(other),
        }
    }
}

impl FromStr for WakeupKind {
    type Err = LoopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(WakeupKind::Auto),
            "eventfd" => Ok(WakeupKind::EventFd),
            "pipe" => Ok(WakeupKind::Pipe),
            other => Err(LoopError::InvalidConfig(format!(
                "unknown wakeup kind {other:?} (expected auto, eventfd or pipe)"
            ))),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    /// Wakeup channel primitive
    pub wakeup: WakeupKind,
    /// Log each tick's computed timeout at debug level instead of trace
    pub debug_ticks: bool,
}

impl LoopConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self, LoopError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup function
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LoopError> {
        let mut config = Self::default();

        if let Some(value) = lookup(WAKEUP_ENV) {
            config.wakeup = value.parse()?;
        }

        if let Some(value) = lookup(DEBUG_ENV) {
            config.debug_ticks = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "" | "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(LoopError::InvalidConfig(format!(
                        "{DEBUG_ENV} must be a boolean, got {other:?}"
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Set the wakeup primitive
    pub fn with_wakeup(mut self, wakeup: WakeupKind) -> Self {
        self.wakeup = wakeup;
        self
    }

    /// Enable or disable per-tick debug logging
    pub fn with_debug_ticks(mut self, enabled: bool) -> Self {
        self.debug_ticks = enabled;
        self
    }
}
