// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Retry Executor
//!
//! Runs arbitrary fallible async operations under a named retry policy:
//! exponential backoff with optional jitter, substring-based retriability,
//! and a per-policy-name circuit breaker consulted before the first attempt.
//!
//! ## Execution sequence
//!
//! 1. Consult the circuit breaker for the policy name. An open circuit whose
//!    cooldown has not elapsed rejects the call outright - the operation is
//!    never invoked and the outcome says `"Circuit breaker is open"`.
//! 2. Run the operation. Success closes the circuit and returns.
//! 3. On failure, match the error text against the policy's retriable
//!    patterns. A non-retriable error returns after exactly one attempt.
//! 4. Otherwise sleep `min(max_delay, base * multiplier^(attempt-1))` -
//!    multiplied by a uniform factor in `[0.5, 1.5)` when jitter is on -
//!    and try again, up to the policy's attempt budget.
//!
//! Every failure, retriable or not, feeds the breaker's consecutive-failure
//! count; every success resets it.

use filecopier_domain::services::circuit_breaker::CircuitBreaker;
use filecopier_domain::value_objects::retry_strategy::{
    RetryStrategy, POLICY_FILE_SYSTEM, POLICY_NETWORK, POLICY_VERIFICATION,
};
use filecopier_domain::CopierError;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// One failed attempt inside an execution.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub error: CopierError,
    /// Backoff slept after this attempt (zero for the final one)
    pub delay: Duration,
}

/// Outcome of executing an operation under a policy.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The operation's value when any attempt succeeded
    pub result: Option<T>,
    /// Attempts actually made; zero when the circuit rejected the call
    pub total_attempts: u32,
    /// Failed attempts, in order
    pub attempts: Vec<AttemptRecord>,
    /// The last error when no attempt succeeded
    pub final_error: Option<CopierError>,
    /// Whether the (last) error matched the policy's retriable patterns
    pub was_retriable: bool,
    /// Human-readable reason when the call failed without exhausting its
    /// attempt budget ("Circuit breaker is open") or after exhausting it
    pub failure_reason: Option<String>,
}

impl<T> RetryOutcome<T> {
    pub fn success(&self) -> bool {
        self.result.is_some()
    }

    /// Collapses the outcome into a `Result`, surfacing the final error.
    pub fn into_result(self) -> Result<T, CopierError> {
        match self.result {
            Some(value) => Ok(value),
            None => Err(self
                .final_error
                .unwrap_or_else(|| CopierError::internal_error("retry outcome carried no error"))),
        }
    }
}

/// Executes operations under named retry policies with circuit breaking.
pub struct RetryExecutor {
    strategies: HashMap<String, RetryStrategy>,
    breaker: CircuitBreaker,
    circuit_trips: AtomicU64,
}

impl RetryExecutor {
    /// Creates an executor over an explicit policy set.
    pub fn new(strategies: Vec<RetryStrategy>, breaker: CircuitBreaker) -> Self {
        let strategies = strategies.into_iter().map(|s| (s.name().to_string(), s)).collect();
        Self {
            strategies,
            breaker,
            circuit_trips: AtomicU64::new(0),
        }
    }

    /// Creates an executor with the built-in `FileSystem`, `Network`, and
    /// `Verification` policies and default breaker settings.
    pub fn with_default_policies() -> Self {
        Self::new(
            vec![
                RetryStrategy::file_system(),
                RetryStrategy::network(),
                RetryStrategy::verification(),
            ],
            CircuitBreaker::default(),
        )
    }

    /// Circuit-breaker state, exposed for health reporting
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Number of times any circuit has transitioned to open
    pub fn circuit_trips(&self) -> u64 {
        self.circuit_trips.load(Ordering::Relaxed)
    }

    /// Sugar for `execute` under the `FileSystem` policy
    pub async fn execute_file_operation<T, F, Fut>(&self, op: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CopierError>>,
    {
        self.execute(POLICY_FILE_SYSTEM, op).await
    }

    /// Sugar for `execute` under the `Network` policy
    pub async fn execute_network_operation<T, F, Fut>(&self, op: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CopierError>>,
    {
        self.execute(POLICY_NETWORK, op).await
    }

    /// Sugar for `execute` under the `Verification` policy
    pub async fn execute_verification_operation<T, F, Fut>(&self, op: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CopierError>>,
    {
        self.execute(POLICY_VERIFICATION, op).await
    }

    /// Executes `op` under the named policy.
    pub async fn execute<T, F, Fut>(&self, policy_name: &str, op: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CopierError>>,
    {
        let strategy = match self.strategies.get(policy_name) {
            Some(strategy) => strategy.clone(),
            None => {
                // Unknown policies run once with no retries rather than
                // failing the call outright
                warn!(policy = policy_name, "no retry strategy configured, running single attempt");
                RetryStrategy::new(
                    policy_name,
                    1,
                    Duration::from_secs(0),
                    Duration::from_secs(0),
                    1.0,
                    false,
                    Vec::new(),
                )
            }
        };

        if !self.breaker.try_acquire(policy_name) {
            return RetryOutcome {
                result: None,
                total_attempts: 0,
                attempts: Vec::new(),
                final_error: Some(CopierError::CircuitOpen(policy_name.to_string())),
                was_retriable: false,
                failure_reason: Some("Circuit breaker is open".to_string()),
            };
        }

        let mut attempts = Vec::new();
        for attempt in 1..=strategy.max_attempts() {
            match op().await {
                Ok(value) => {
                    self.breaker.record_success(policy_name);
                    return RetryOutcome {
                        result: Some(value),
                        total_attempts: attempt,
                        attempts,
                        final_error: None,
                        was_retriable: true,
                        failure_reason: None,
                    };
                }
                Err(error) => {
                    if self.breaker.record_failure(policy_name) {
                        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
                        warn!(policy = policy_name, "circuit breaker opened");
                    }

                    let retriable = strategy.is_retriable(&error.to_string());
                    let last_attempt = attempt == strategy.max_attempts();

                    if !retriable || last_attempt {
                        attempts.push(AttemptRecord {
                            attempt,
                            error: error.clone(),
                            delay: Duration::ZERO,
                        });
                        let failure_reason = if !retriable {
                            None
                        } else {
                            Some(format!("retry budget of {} attempts exhausted", strategy.max_attempts()))
                        };
                        return RetryOutcome {
                            result: None,
                            total_attempts: attempt,
                            attempts,
                            final_error: Some(error),
                            was_retriable: retriable,
                            failure_reason,
                        };
                    }

                    let delay = self.backoff_delay(&strategy, attempt);
                    debug!(
                        policy = policy_name,
                        attempt,
                        ?delay,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    attempts.push(AttemptRecord { attempt, error, delay });
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // Unreachable: the loop always returns on the last attempt
        RetryOutcome {
            result: None,
            total_attempts: strategy.max_attempts(),
            attempts,
            final_error: Some(CopierError::internal_error("retry loop exited without outcome")),
            was_retriable: false,
            failure_reason: None,
        }
    }

    fn backoff_delay(&self, strategy: &RetryStrategy, attempt: u32) -> Duration {
        let base = strategy.delay_for_attempt(attempt);
        if strategy.use_jitter() {
            let factor: f64 = rand::rng().random_range(0.5..1.5);
            base.mul_f64(factor)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn quick_strategy(name: &str, max_attempts: u32, patterns: Vec<String>) -> RetryStrategy {
        RetryStrategy::new(
            name,
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
            false,
            patterns,
        )
    }

    fn executor_with(strategy: RetryStrategy, threshold: u32) -> RetryExecutor {
        RetryExecutor::new(vec![strategy], CircuitBreaker::new(threshold, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt_after_sharing_violations() {
        let executor = executor_with(
            quick_strategy("FileSystem", 3, vec!["sharing violation".into()]),
            100,
        );
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let outcome = executor
            .execute("FileSystem", move || {
                let calls = Arc::clone(&calls_ref);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(CopierError::io_error("sharing violation"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.result, Some(42));
        assert_eq!(outcome.total_attempts, 3);
        assert_eq!(outcome.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_non_retriable_error_returns_after_one_attempt() {
        let executor = executor_with(
            quick_strategy("FileSystem", 3, vec!["sharing violation".into()]),
            100,
        );
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let outcome: RetryOutcome<u32> = executor
            .execute("FileSystem", move || {
                let calls = Arc::clone(&calls_ref);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CopierError::permission_denied("access denied"))
                }
            })
            .await;

        assert!(!outcome.success());
        assert!(!outcome.was_retriable);
        assert_eq!(outcome.total_attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome.final_error, Some(CopierError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_reports_reason() {
        let executor = executor_with(quick_strategy("FileSystem", 3, vec!["locked".into()]), 100);
        let outcome: RetryOutcome<u32> = executor
            .execute("FileSystem", || async { Err(CopierError::io_error("file is locked")) })
            .await;

        assert!(!outcome.success());
        assert!(outcome.was_retriable);
        assert_eq!(outcome.total_attempts, 3);
        assert!(outcome.failure_reason.unwrap().contains("exhausted"));
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_invoking_operation() {
        let executor = executor_with(quick_strategy("Test", 1, vec![]), 3);
        let calls = Arc::new(AtomicU32::new(0));

        // Four consecutive failing invocations; the breaker opens at the
        // third and the fourth is already rejected at the gate
        for _ in 0..4 {
            let calls_ref = Arc::clone(&calls);
            let _: RetryOutcome<u32> = executor
                .execute("Test", move || {
                    let calls = Arc::clone(&calls_ref);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(CopierError::io_error("boom"))
                    }
                })
                .await;
        }

        let before = calls.load(Ordering::SeqCst);
        let calls_ref = Arc::clone(&calls);
        let outcome: RetryOutcome<u32> = executor
            .execute("Test", move || {
                let calls = Arc::clone(&calls_ref);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CopierError::io_error("boom"))
                }
            })
            .await;

        assert!(!outcome.success());
        assert_eq!(outcome.total_attempts, 0);
        assert_eq!(outcome.failure_reason.as_deref(), Some("Circuit breaker is open"));
        assert_eq!(calls.load(Ordering::SeqCst), before, "operation must not run");
        assert!(executor.circuit_trips() >= 1);
    }

    #[tokio::test]
    async fn test_success_closes_the_circuit() {
        let executor = executor_with(quick_strategy("Test", 1, vec![]), 2);
        let _: RetryOutcome<u32> = executor
            .execute("Test", || async { Err(CopierError::io_error("boom")) })
            .await;
        let ok = executor.execute("Test", || async { Ok(1u32) }).await;
        assert!(ok.success());

        // The earlier failure no longer counts toward the threshold
        let _: RetryOutcome<u32> = executor
            .execute("Test", || async { Err(CopierError::io_error("boom")) })
            .await;
        let after = executor.execute("Test", || async { Ok(2u32) }).await;
        assert!(after.success());
    }

    #[tokio::test]
    async fn test_unknown_policy_runs_single_attempt() {
        let executor = RetryExecutor::with_default_policies();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let outcome: RetryOutcome<u32> = executor
            .execute("NoSuchPolicy", move || {
                let calls = Arc::clone(&calls_ref);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CopierError::io_error("boom"))
                }
            })
            .await;

        assert_eq!(outcome.total_attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_into_result_surfaces_final_error() {
        let executor = executor_with(quick_strategy("Test", 1, vec![]), 100);
        let outcome: RetryOutcome<u32> = executor
            .execute("Test", || async { Err(CopierError::io_error("boom")) })
            .await;
        assert!(matches!(outcome.into_result(), Err(CopierError::IoError(_))));
    }
}
