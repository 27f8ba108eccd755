//! Key repeat driven by a loop timer
//!
//! Windowing backends synthesize repeated key presses themselves. A single
//! disabled repeating timer is armed with the repeat delay on key press and
//! re-armed with the repeat interval every time it fires.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, trace};

use crate::error::LoopError;
use crate::event_loop::{Registry, Timer, TimerId};

/// Name of the repeat timer
pub const KEY_REPEAT_TIMER_NAME: &str = "key-repeat";

#[derive(Debug)]
struct RepeatState {
    /// Repeat rate (characters per second), 0 disables repeat
    rate: u32,
    /// Repeat delay (milliseconds)
    delay: u32,
    /// Key currently repeating
    key: Option<u32>,
}

impl RepeatState {
    fn interval(&self) -> Option<Duration> {
        (self.rate > 0).then(|| Duration::from_secs(1) / self.rate)
    }
}

/// Key repeat state bound to a timer in a [`Registry`]
#[derive(Debug)]
pub struct KeyRepeater {
    state: Rc<RefCell<RepeatState>>,
    timer: TimerId,
}

impl KeyRepeater {
    /// Register the repeat timer; `on_repeat` receives the repeated keycode
    pub fn register<D: 'static>(
        registry: &mut Registry<D>,
        mut on_repeat: impl FnMut(&mut D, u32) + 'static,
    ) -> Result<Self, LoopError> {
        let state = Rc::new(RefCell::new(RepeatState {
            rate: 25,
            delay: 600,
            key: None,
        }));

        let delay = Duration::from_millis(u64::from(state.borrow().delay));
        let timer = registry.add_timer(
            Timer::new(KEY_REPEAT_TIMER_NAME, delay, {
                let state = state.clone();
                move |registry: &mut Registry<D>, data: &mut D, id| {
                    let (key, interval) = {
                        let state = state.borrow();
                        (state.key, state.interval())
                    };
                    let (Some(key), Some(interval)) = (key, interval) else {
                        registry.toggle_timer(id, false);
                        return;
                    };

                    trace!("Repeating key {}", key);
                    on_repeat(data, key);
                    registry.change_interval(id, interval);
                    registry.toggle_timer(id, true);
                }
            })
            .enabled(false)
            .repeating(true),
        )?;

        Ok(Self { state, timer })
    }

    /// Id of the repeat timer
    pub fn timer(&self) -> TimerId {
        self.timer
    }

    /// Set repeat rate (per second) and delay (milliseconds)
    pub fn set_repeat_info(&self, rate: u32, delay: u32) {
        let mut state = self.state.borrow_mut();
        state.rate = rate;
        state.delay = delay;
        debug!("Key repeat set to rate {} delay {}ms", rate, delay);
    }

    /// Get repeat info
    pub fn repeat_info(&self) -> (u32, u32) {
        let state = self.state.borrow();
        (state.rate, state.delay)
    }

    /// Key currently repeating
    pub fn repeating_key(&self) -> Option<u32> {
        self.state.borrow().key
    }

    /// Handle a key press: start repeating `keycode` after the delay
    pub fn key_press<D>(&self, registry: &mut Registry<D>, keycode: u32) {
        let mut state = self.state.borrow_mut();
        if state.rate == 0 {
            return;
        }
        state.key = Some(keycode);
        registry.change_interval(self.timer, Duration::from_millis(u64::from(state.delay)));
        registry.toggle_timer(self.timer, true);
    }

    /// Handle a key release; only the repeating key stops the timer
    pub fn key_release<D>(&self, registry: &mut Registry<D>, keycode: u32) {
        let mut state = self.state.borrow_mut();
        if state.key == Some(keycode) {
            state.key = None;
            registry.toggle_timer(self.timer, false);
        }
    }

    /// Remove the repeat timer from the registry
    pub fn unregister<D>(self, registry: &mut Registry<D>) {
        registry.remove_timer(self.timer);
    }
}
