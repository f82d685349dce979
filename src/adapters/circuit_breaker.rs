//! Per-adapter-instance circuit breaker. CLOSED -> OPEN -> HALF_OPEN -> CLOSED.
//!
//! Deliberately not keyed by a string map: each adapter owns exactly one
//! breaker, so the critical section is a single small struct guarded by a
//! `parking_lot::Mutex`, never held across an I/O call.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    /// Set while a HALF_OPEN probe is outstanding, so concurrent callers
    /// don't all get admitted at once — the spec calls for "a single probe".
    probe_in_flight: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    success_threshold: u32,
    recovery_timeout: Duration,
    name: &'static str,
}

impl CircuitBreaker {
    pub fn new(
        name: &'static str,
        failure_threshold: u32,
        success_threshold: u32,
        recovery_timeout: Duration,
    ) -> Self {
        CircuitBreaker {
            state: Mutex::new(BreakerState::default()),
            failure_threshold,
            success_threshold,
            recovery_timeout,
            name,
        }
    }

    /// Returns true if a call should be admitted right now. Transitions
    /// OPEN -> HALF_OPEN as a side effect once `recovery_timeout` elapses.
    pub fn allow_request(&self) -> bool {
        let mut guard = self.state.lock();
        match guard.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if guard.probe_in_flight {
                    false
                } else {
                    guard.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                let elapsed = guard.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    guard.state = CircuitState::HalfOpen;
                    guard.consecutive_successes = 0;
                    guard.probe_in_flight = true;
                    tracing::info!(adapter = self.name, "circuit half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.state.lock();
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                guard.probe_in_flight = false;
                if guard.consecutive_successes >= self.success_threshold {
                    guard.state = CircuitState::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                    tracing::info!(adapter = self.name, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
        metrics::gauge!("adapter_circuit_state", self.state_gauge_value(&guard.state), "adapter" => self.name);
    }

    pub fn record_failure(&self) {
        let mut guard = self.state.lock();
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                    tracing::warn!(adapter = self.name, "circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.opened_at = Some(Instant::now());
                guard.consecutive_successes = 0;
                guard.probe_in_flight = false;
                tracing::warn!(adapter = self.name, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
        metrics::gauge!("adapter_circuit_state", self.state_gauge_value(&guard.state), "adapter" => self.name);
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    fn state_gauge_value(&self, state: &CircuitState) -> f64 {
        match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        }
    }
}
