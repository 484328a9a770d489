// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Retry Strategy Value Object
//!
//! A named retry policy: attempt budget, exponential backoff parameters, and
//! the set of case-insensitive substrings that mark an error retriable under
//! this policy. The policy name doubles as the circuit-breaker key, so
//! consecutive failures of, say, `FileSystem` operations trip one shared
//! breaker no matter which file they touched.
//!
//! The delay computation is a pure function and is tested as one:
//! `delay(attempt) = min(max_delay, base * multiplier^(attempt - 1))`.
//! Jitter is applied by the retry executor, not here, so the formula stays
//! deterministic.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Well-known policy name for filesystem copy operations
pub const POLICY_FILE_SYSTEM: &str = "FileSystem";

/// Well-known policy name for network-path operations
pub const POLICY_NETWORK: &str = "Network";

/// Well-known policy name for verification operations
pub const POLICY_VERIFICATION: &str = "Verification";

/// Named retry policy with backoff parameters and retriability patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    name: String,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    use_jitter: bool,
    retriable_patterns: Vec<String>,
}

impl RetryStrategy {
    /// Creates a policy. `max_attempts` is clamped to at least 1 and the
    /// multiplier to at least 1.0 so the delay sequence stays monotone.
    pub fn new(
        name: impl Into<String>,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        use_jitter: bool,
        retriable_patterns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            backoff_multiplier: backoff_multiplier.max(1.0),
            use_jitter,
            retriable_patterns: retriable_patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Default policy for filesystem copies: 3 attempts, 1s base, 30s cap,
    /// doubling, jittered.
    pub fn file_system() -> Self {
        Self::new(
            POLICY_FILE_SYSTEM,
            3,
            Duration::from_secs(1),
            Duration::from_secs(30),
            2.0,
            true,
            vec![
                "sharing violation".into(),
                "in use by another process".into(),
                "locked".into(),
                "timed out".into(),
                "io error".into(),
            ],
        )
    }

    /// Default policy for network-path operations: 5 attempts, 2s base, 60s
    /// cap, doubling, jittered.
    pub fn network() -> Self {
        Self::new(
            POLICY_NETWORK,
            5,
            Duration::from_secs(2),
            Duration::from_secs(60),
            2.0,
            true,
            vec![
                "network".into(),
                "unreachable".into(),
                "connection reset".into(),
                "connection refused".into(),
                "timed out".into(),
            ],
        )
    }

    /// Default policy for verification: 2 attempts, 500ms base, 5s cap.
    ///
    /// Hash mismatches are never retriable; only the I/O wrapping the hash
    /// computation is.
    pub fn verification() -> Self {
        Self::new(
            POLICY_VERIFICATION,
            2,
            Duration::from_millis(500),
            Duration::from_secs(5),
            2.0,
            false,
            vec!["io error".into(), "timed out".into(), "sharing violation".into()],
        )
    }

    /// Policy name; also the circuit-breaker key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay before the first retry
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound on any computed delay
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Backoff multiplier applied per attempt
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Whether the executor should jitter the computed delay
    pub fn use_jitter(&self) -> bool {
        self.use_jitter
    }

    /// Lowercased retriable substring patterns
    pub fn retriable_patterns(&self) -> &[String] {
        &self.retriable_patterns
    }

    /// Deterministic backoff delay before retry number `attempt` (1-based):
    /// `min(max_delay, base * multiplier^(attempt - 1))`.
    ///
    /// `attempt = 0` is treated as 1 so callers cannot underflow the
    /// exponent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = self.backoff_multiplier.powi(exponent as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether `message` matches any retriable pattern of this policy.
    ///
    /// Matching is case-insensitive substring containment; an empty pattern
    /// set means nothing is retriable.
    pub fn is_retriable(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.retriable_patterns.iter().any(|p| lowered.contains(p))
    }
}
