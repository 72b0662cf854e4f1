use crate::clock::{Clock, SystemClock};
use crate::error::GatewayError;
use crate::events::Timestamp;
use chrono::Duration;
use log::debug;
use std::sync::{Arc, Mutex};

/// Fixed-window limiter for model calls
///
/// The window opens at the first admission and resets once a call arrives
/// after `window_start + window`. Admission reserves a slot atomically, so
/// concurrent callers can never over-admit; the slot only counts against
/// the window once the caller commits its [`RatePermit`].
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<WindowState>>,
}

#[derive(Debug)]
struct WindowState {
    window_start: Option<Timestamp>,
    committed: usize,
    reserved: usize,
}

/// A reserved slot in the current window
///
/// Dropping a permit without committing it releases the slot.
#[must_use = "a permit releases its slot when dropped"]
pub struct RatePermit {
    state: Arc<Mutex<WindowState>>,
    settled: bool,
}

impl RatePermit {
    /// Count this call against the window
    pub fn commit(mut self) {
        let mut state = self.state.lock().unwrap();
        state.reserved = state.reserved.saturating_sub(1);
        state.committed += 1;
        drop(state);
        self.settled = true;
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.state.lock().unwrap();
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}

impl RateLimiter {
    /// Create a limiter allowing `max_calls` per `window` of wall-clock time
    pub fn new(max_calls: usize, window: std::time::Duration) -> Self {
        Self::with_clock(max_calls, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_calls: usize, window: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_calls,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::days(36_500)),
            clock,
            state: Arc::new(Mutex::new(WindowState {
                window_start: None,
                committed: 0,
                reserved: 0,
            })),
        }
    }

    /// Reserve a slot, or fail if the window is exhausted
    pub fn try_acquire(&self) -> Result<RatePermit, GatewayError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        self.roll_window(&mut state, now);

        if state.committed + state.reserved >= self.max_calls {
            debug!(
                "Rate limit reached: {} committed, {} in flight, max {}",
                state.committed, state.reserved, self.max_calls
            );
            return Err(GatewayError::RateLimitExceeded);
        }

        if state.window_start.is_none() {
            state.window_start = Some(now);
        }
        state.reserved += 1;

        Ok(RatePermit {
            state: Arc::clone(&self.state),
            settled: false,
        })
    }

    /// Calls counted against the current window
    pub fn current_count(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        self.roll_window(&mut state, now);
        state.committed
    }

    /// Slots still available in the current window, excluding in-flight calls
    pub fn remaining(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        self.roll_window(&mut state, now);
        self.max_calls.saturating_sub(state.committed + state.reserved)
    }

    fn roll_window(&self, state: &mut WindowState, now: Timestamp) {
        if let Some(start) = state.window_start {
            let expired = start
                .checked_add_signed(self.window)
                .is_some_and(|end| now > end);
            if expired {
                debug!("Rate limit window expired, resetting");
                state.window_start = None;
                state.committed = 0;
            }
        }
    }
}
