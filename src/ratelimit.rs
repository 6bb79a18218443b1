//! Feedback-controlled rate limiting of caught-exception capture.
//!
//! This is a feedback controller, not a hard cap: bursts under the
//! threshold are always allowed, sustained bursts earn exponentially
//! longer cool-downs. The state machine itself is pure and sampled on a
//! fixed timer, so it stays unit-testable without real time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Default sampling interval of the limiter state.
pub const RATE_LIMIT_TICK: Duration = Duration::from_secs(1);

const INITIAL_RETRY_SECS: u64 = 5;
const MAX_RETRY_SECS: u64 = 86400;

/// State change produced by a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Change {
    /// The cool-down expired, capture may be re-enabled.
    Enabled,
    /// The threshold was exceeded, capture must be disabled for the
    /// given number of seconds.
    Disabled(u64),
}

/// Rolling per-tick limiter state. Transitions are pure; the caller
/// samples `tick` on a fixed interval and feeds `increment` per event.
#[derive(Debug)]
pub struct RateLimiterState {
    max_per_tick: u32,
    events: u32,
    retry_secs: u64,
    disabled_for: u64,
}

impl RateLimiterState {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_tick: max_per_second,
            events: 0,
            retry_secs: INITIAL_RETRY_SECS,
            disabled_for: 0,
        }
    }

    /// Count one event against the current tick.
    pub fn increment(&mut self) {
        self.events = self.events.saturating_add(1);
    }

    /// Advance one tick. The event counter resets every tick regardless
    /// of disabled state.
    pub fn tick(&mut self) -> Option<Change> {
        let change = if self.disabled_for == 0 {
            if self.events > self.max_per_tick {
                let cooldown = self.retry_secs;
                // double the cool-down for the next violation, capped at one day
                self.retry_secs = (self.retry_secs * 2).min(MAX_RETRY_SECS);
                self.disabled_for = cooldown;
                Some(Change::Disabled(cooldown))
            } else {
                None
            }
        } else {
            self.disabled_for -= 1;
            (self.disabled_for == 0).then_some(Change::Enabled)
        };

        self.events = 0;
        change
    }
}

/// Handle to a limiter sampled by a background ticker thread.
///
/// `enable`/`disable` run on the ticker thread. The thread stops when the
/// handle is dropped.
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
    stop: Arc<AtomicBool>,
    ticker: Option<thread::JoinHandle<()>>,
}

impl RateLimiter {
    pub fn start(
        max_per_second: u32,
        tick_interval: Duration,
        mut enable: impl FnMut() + Send + 'static,
        mut disable: impl FnMut(u64) + Send + 'static,
    ) -> Self {
        let state = Arc::new(Mutex::new(RateLimiterState::new(max_per_second)));
        let stop = Arc::new(AtomicBool::new(false));

        let ticker = thread::spawn({
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(tick_interval);

                    let change = match state.lock() {
                        Ok(mut state) => state.tick(),
                        Err(_) => break,
                    };

                    match change {
                        Some(Change::Enabled) => enable(),
                        Some(Change::Disabled(seconds)) => disable(seconds),
                        None => {}
                    }
                }
            }
        });

        Self {
            state,
            stop,
            ticker: Some(ticker),
        }
    }

    /// Count one event against the current tick.
    pub fn increment(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.increment();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn violate(state: &mut RateLimiterState) -> Option<Change> {
        for _ in 0..state.max_per_tick + 1 {
            state.increment();
        }
        state.tick()
    }

    #[test]
    fn test_burst_under_threshold_is_allowed() {
        let mut state = RateLimiterState::new(2);
        state.increment();
        state.increment();
        assert_eq!(state.tick(), None);
    }

    #[test]
    fn test_first_violation_disables_for_five_seconds() {
        let mut state = RateLimiterState::new(2);
        state.increment();
        state.increment();
        state.increment();
        assert_eq!(state.tick(), Some(Change::Disabled(5)));
    }

    #[test]
    fn test_backoff_doubles_on_repeated_violation() {
        let mut state = RateLimiterState::new(1);

        assert_eq!(violate(&mut state), Some(Change::Disabled(5)));

        // cool-down: four silent ticks, then re-enable
        for _ in 0..4 {
            assert_eq!(state.tick(), None);
        }
        assert_eq!(state.tick(), Some(Change::Enabled));

        assert_eq!(violate(&mut state), Some(Change::Disabled(10)));
    }

    #[test]
    fn test_backoff_is_capped_at_one_day() {
        let mut state = RateLimiterState::new(0);

        let mut last = 0;
        for _ in 0..20 {
            match violate(&mut state) {
                Some(Change::Disabled(seconds)) => last = seconds,
                other => panic!("expected disable, got {other:?}"),
            }
            // burn the cool-down
            while state.tick() != Some(Change::Enabled) {}
        }

        assert_eq!(last, MAX_RETRY_SECS);
    }

    #[test]
    fn test_counter_resets_every_tick() {
        let mut state = RateLimiterState::new(2);

        state.increment();
        state.increment();
        assert_eq!(state.tick(), None);

        // two more in the next tick: still under the threshold
        state.increment();
        state.increment();
        assert_eq!(state.tick(), None);
    }

    #[test]
    fn test_events_while_disabled_do_not_extend_cooldown() {
        let mut state = RateLimiterState::new(0);
        assert_eq!(violate(&mut state), Some(Change::Disabled(5)));

        for _ in 0..4 {
            state.increment();
            assert_eq!(state.tick(), None);
        }
        assert_eq!(state.tick(), Some(Change::Enabled));
    }

    #[test]
    fn test_ticker_thread_invokes_callbacks() {
        let disabled = Arc::new(Mutex::new(Vec::new()));

        let limiter = RateLimiter::start(
            2,
            Duration::from_millis(50),
            || {},
            {
                let disabled = Arc::clone(&disabled);
                move |seconds| disabled.lock().unwrap().push(seconds)
            },
        );

        for _ in 0..3 {
            limiter.increment();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while disabled.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(disabled.lock().unwrap().as_slice(), &[5]);
    }
}
