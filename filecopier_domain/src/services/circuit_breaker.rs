// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Circuit Breaker
//!
//! Per-policy-name failure gate. After `threshold` consecutive failures a
//! name's circuit opens and callers are rejected without running their
//! operation until the cooldown elapses; then a single probe is admitted
//! (half-open), and its outcome decides between closing the circuit and
//! opening it again.
//!
//! State per name is tiny and guarded by one small mutex; the gate sits in
//! front of I/O, never around it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default consecutive-failure threshold before a circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown an open circuit waits before admitting a probe
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(60);

/// Observable circuit state for one policy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct CircuitState {
    consecutive_failures: u32,
    status: CircuitStatus,
    opened_at: Option<Instant>,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            status: CircuitStatus::Closed,
            opened_at: None,
        }
    }
}

/// Per-operation-name circuit breaker table.
pub struct CircuitBreaker {
    threshold: u32,
    open_duration: Duration,
    circuits: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, open_duration: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            open_duration,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Asks whether a call under `name` may proceed.
    ///
    /// Returns `false` while the circuit is open and the cooldown has not
    /// elapsed. When the cooldown has elapsed the circuit transitions to
    /// half-open and this call admits exactly one probe; concurrent callers
    /// see `false` until the probe reports its outcome.
    pub fn try_acquire(&self, name: &str) -> bool {
        let mut circuits = self.circuits.lock();
        let state = circuits.entry(name.to_string()).or_insert_with(CircuitState::new);
        match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::HalfOpen => false,
            CircuitStatus::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_duration {
                    state.status = CircuitStatus::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call: the circuit closes and the failure count
    /// resets.
    pub fn record_success(&self, name: &str) {
        let mut circuits = self.circuits.lock();
        let state = circuits.entry(name.to_string()).or_insert_with(CircuitState::new);
        state.consecutive_failures = 0;
        state.status = CircuitStatus::Closed;
        state.opened_at = None;
    }

    /// Records a failed call. Returns `true` when this failure opened the
    /// circuit (callers count breaker trips).
    pub fn record_failure(&self, name: &str) -> bool {
        let mut circuits = self.circuits.lock();
        let state = circuits.entry(name.to_string()).or_insert_with(CircuitState::new);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let should_open = match state.status {
            // A failed half-open probe reopens immediately
            CircuitStatus::HalfOpen => true,
            CircuitStatus::Closed => state.consecutive_failures >= self.threshold,
            CircuitStatus::Open => false,
        };
        if should_open {
            state.status = CircuitStatus::Open;
            state.opened_at = Some(Instant::now());
        }
        should_open
    }

    /// Current status for `name`; `Closed` for names never seen
    pub fn status(&self, name: &str) -> CircuitStatus {
        self.circuits
            .lock()
            .get(name)
            .map(|s| s.status)
            .unwrap_or(CircuitStatus::Closed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_circuit_admits_calls() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.try_acquire("FileSystem"));
        assert_eq!(breaker.status("FileSystem"), CircuitStatus::Closed);
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.record_failure("FileSystem"));
        assert!(!breaker.record_failure("FileSystem"));
        assert!(breaker.record_failure("FileSystem"));
        assert_eq!(breaker.status("FileSystem"), CircuitStatus::Open);
        assert!(!breaker.try_acquire("FileSystem"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure("FileSystem");
        breaker.record_failure("FileSystem");
        breaker.record_success("FileSystem");
        assert!(!breaker.record_failure("FileSystem"));
        assert_eq!(breaker.status("FileSystem"), CircuitStatus::Closed);
    }

    #[test]
    fn test_half_open_probe_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure("Network");
        assert_eq!(breaker.status("Network"), CircuitStatus::Open);

        // Zero cooldown: the next acquire is the half-open probe
        assert!(breaker.try_acquire("Network"));
        assert_eq!(breaker.status("Network"), CircuitStatus::HalfOpen);

        // Concurrent callers are held out while the probe is in flight
        assert!(!breaker.try_acquire("Network"));

        breaker.record_success("Network");
        assert_eq!(breaker.status("Network"), CircuitStatus::Closed);
        assert!(breaker.try_acquire("Network"));
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(0));
        breaker.record_failure("Network");
        breaker.record_failure("Network");
        assert!(breaker.try_acquire("Network")); // probe admitted
        assert!(breaker.record_failure("Network")); // probe failed
        assert_eq!(breaker.status("Network"), CircuitStatus::Open);
    }

    #[test]
    fn test_names_are_isolated() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("FileSystem");
        assert_eq!(breaker.status("FileSystem"), CircuitStatus::Open);
        assert_eq!(breaker.status("Verification"), CircuitStatus::Closed);
        assert!(breaker.try_acquire("Verification"));
    }
}
