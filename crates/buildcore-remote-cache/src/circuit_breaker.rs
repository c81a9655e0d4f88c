//! Per-endpoint circuit breaker: closed → open after 5 consecutive
//! failures within 30s, half-open after 10s, closed again after 3 consecutive
//! successes.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

const FAILURE_THRESHOLD: u32 = 5;
const FAILURE_WINDOW: Duration = Duration::from_secs(30);
const OPEN_COOLDOWN: Duration = Duration::from_secs(10);
const SUCCESS_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    consecutive_successes: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Guards one remote endpoint. `allow()` decides whether a call may proceed;
/// `on_success`/`on_failure` feed the outcome back in.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                window_start: None,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> State {
        let mut inner = self.inner.lock();
        self.transition_if_cooldown_elapsed(&mut inner);
        inner.state
    }

    fn transition_if_cooldown_elapsed(&self, inner: &mut Inner) {
        if inner.state == State::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= OPEN_COOLDOWN {
                    inner.state = State::HalfOpen;
                    inner.consecutive_successes = 0;
                }
            }
        }
    }

    /// Whether a request may be attempted right now.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        self.transition_if_cooldown_elapsed(&mut inner);
        !matches!(inner.state, State::Open)
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= SUCCESS_THRESHOLD {
                    inner.state = State::Closed;
                    inner.consecutive_failures = 0;
                    inner.window_start = None;
                }
            }
            State::Closed => {
                inner.consecutive_failures = 0;
                inner.window_start = None;
            }
            State::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = 0;
            }
            State::Closed => {
                let now = Instant::now();
                let window_start = *inner.window_start.get_or_insert(now);
                if now.duration_since(window_start) > FAILURE_WINDOW {
                    inner.window_start = Some(now);
                    inner.consecutive_failures = 1;
                } else {
                    inner.consecutive_failures += 1;
                }
                if inner.consecutive_failures >= FAILURE_THRESHOLD {
                    inner.state = State::Open;
                    inner.opened_at = Some(now);
                }
            }
            State::Open => {}
        }
    }
}
