// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Error Classifier
//!
//! Maps raw failures onto `(category, severity, transient, strategy)` using
//! a fixed, first-match-wins rule table over the lowercased error message.
//! The mapping itself is a pure function: classifying the same error twice
//! yields the same category and strategy.
//!
//! ## Side-state
//!
//! The classifier keeps one piece of state: a bounded history keyed by
//! `operation:path`. Every classification increments that key's attempt
//! counter, and when the counter crosses the escalation threshold inside the
//! escalation window the severity is bumped and the strategy becomes
//! `Escalate` regardless of category - a file that keeps failing the same
//! way needs a human, not more retries. Entries older than the retention
//! window are dropped by `sweep_history()`, which the queue's maintenance
//! task calls periodically.

use crate::error::CopierError;
use crate::value_objects::error_info::{ErrorCategory, ErrorInfo, ErrorSeverity, RecoveryStrategy};
use crate::value_objects::operation_id::ErrorId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

/// Default escalation threshold: repeated failures of one `operation:path`
/// pair before the strategy is forced to `Escalate`
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 5;

/// Default window within which repeats count toward escalation
pub const DEFAULT_ESCALATION_WINDOW_HOURS: i64 = 24;

/// Default retention for history entries
pub const DEFAULT_HISTORY_RETENTION_DAYS: i64 = 30;

/// Upper bound on tracked `operation:path` keys; oldest entries are evicted
/// beyond this.
const HISTORY_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
struct HistoryEntry {
    first_occurrence: DateTime<Utc>,
    last_occurrence: DateTime<Utc>,
    attempts: u32,
}

/// Stateless rule table plus bounded attempt history.
pub struct ErrorClassifier {
    escalation_threshold: u32,
    escalation_window: ChronoDuration,
    history_retention: ChronoDuration,
    history: Mutex<HashMap<String, HistoryEntry>>,
}

impl ErrorClassifier {
    /// Creates a classifier with explicit thresholds.
    pub fn new(escalation_threshold: u32, history_retention_days: i64) -> Self {
        Self {
            escalation_threshold: escalation_threshold.max(1),
            escalation_window: ChronoDuration::hours(DEFAULT_ESCALATION_WINDOW_HOURS),
            history_retention: ChronoDuration::days(history_retention_days.max(1)),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Classifies one failure occurrence.
    ///
    /// `operation_context` names the failing operation (`copy`, `verify`,
    /// ...); together with the path it forms the history key.
    pub fn classify(&self, error: &CopierError, operation_context: &str, file_path: Option<&Path>) -> ErrorInfo {
        let message = error.to_string();
        let (category, severity, transient, strategy) = classify_message(error, &message);

        let key = format!(
            "{}:{}",
            operation_context,
            file_path.map(|p| p.display().to_string()).unwrap_or_default()
        );
        let now = Utc::now();

        let (first_occurrence, attempts) = {
            let mut history = self.history.lock();
            if history.len() >= HISTORY_CAPACITY && !history.contains_key(&key) {
                evict_oldest(&mut history);
            }
            let entry = history.entry(key).or_insert(HistoryEntry {
                first_occurrence: now,
                last_occurrence: now,
                attempts: 0,
            });
            // A stale entry outside the escalation window restarts the count
            if now - entry.last_occurrence > self.escalation_window {
                entry.first_occurrence = now;
                entry.attempts = 0;
            }
            entry.attempts += 1;
            entry.last_occurrence = now;
            (entry.first_occurrence, entry.attempts)
        };

        let escalated = attempts >= self.escalation_threshold;
        let severity = if escalated { severity.escalated() } else { severity };
        let strategy = if escalated { RecoveryStrategy::Escalate } else { strategy };

        ErrorInfo {
            error_id: ErrorId::new(),
            first_occurrence,
            attempt_count: attempts,
            category,
            severity,
            transient,
            strategy,
            operation_context: operation_context.to_string(),
            file_path: file_path.map(|p| p.to_path_buf()),
            message,
            properties: BTreeMap::new(),
        }
    }

    /// Drops history entries whose last occurrence is older than the
    /// retention window. Returns the number of entries removed.
    pub fn sweep_history(&self) -> usize {
        let cutoff = Utc::now() - self.history_retention;
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|_, entry| entry.last_occurrence >= cutoff);
        before - history.len()
    }

    /// Number of tracked `operation:path` keys
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ESCALATION_THRESHOLD, DEFAULT_HISTORY_RETENTION_DAYS)
    }
}

fn evict_oldest(history: &mut HashMap<String, HistoryEntry>) {
    if let Some(oldest) = history
        .iter()
        .min_by_key(|(_, e)| e.last_occurrence)
        .map(|(k, _)| k.clone())
    {
        history.remove(&oldest);
    }
}

/// The rule table. First match wins; order mirrors how specific each signal
/// is, with the typed variants checked before message substrings.
fn classify_message(
    error: &CopierError,
    message: &str,
) -> (ErrorCategory, ErrorSeverity, bool, RecoveryStrategy) {
    let lowered = message.to_lowercase();
    let contains = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    // Typed variants carry more signal than any substring
    match error {
        CopierError::PermissionDenied(_) => {
            return (
                ErrorCategory::Permission,
                ErrorSeverity::Error,
                false,
                RecoveryStrategy::Escalate,
            );
        }
        CopierError::IntegrityError(_) => {
            return (
                ErrorCategory::Verification,
                ErrorSeverity::Error,
                false,
                RecoveryStrategy::Quarantine,
            );
        }
        CopierError::Cancelled(_) => {
            return (
                ErrorCategory::Unknown,
                ErrorSeverity::Info,
                false,
                RecoveryStrategy::Abort,
            );
        }
        _ => {}
    }

    if contains(&["path too long", "name too long", "filename too long"]) {
        // Retrying cannot shorten a path
        return (
            ErrorCategory::FileSystem,
            ErrorSeverity::Error,
            false,
            RecoveryStrategy::Escalate,
        );
    }
    if contains(&["file not found", "no such file", "directory not found", "not found"]) {
        return (
            ErrorCategory::FileSystem,
            ErrorSeverity::Warning,
            true,
            RecoveryStrategy::DelayedRetry,
        );
    }
    if contains(&["sharing violation", "in use by another process", "locked"]) {
        return (
            ErrorCategory::FileSystem,
            ErrorSeverity::Warning,
            true,
            RecoveryStrategy::DelayedRetry,
        );
    }
    if contains(&[
        "network path",
        "unreachable",
        "connection reset",
        "connection refused",
        "timed out",
        "timeout",
    ]) {
        return (
            ErrorCategory::Network,
            ErrorSeverity::Warning,
            true,
            RecoveryStrategy::DelayedRetry,
        );
    }
    if contains(&["unauthorized", "access denied", "access is denied", "permission"]) {
        return (
            ErrorCategory::Permission,
            ErrorSeverity::Error,
            false,
            RecoveryStrategy::Escalate,
        );
    }
    if contains(&["hash mismatch", "corrupt", "checksum", "integrity"]) {
        return (
            ErrorCategory::Verification,
            ErrorSeverity::Error,
            false,
            RecoveryStrategy::Quarantine,
        );
    }
    if contains(&["disk full", "no space", "storage full", "quota"]) {
        return (
            ErrorCategory::Resource,
            ErrorSeverity::Critical,
            false,
            RecoveryStrategy::Escalate,
        );
    }
    if contains(&["out of memory", "memory"]) {
        return (
            ErrorCategory::Resource,
            ErrorSeverity::Error,
            true,
            RecoveryStrategy::DelayedRetry,
        );
    }

    (
        ErrorCategory::Unknown,
        ErrorSeverity::Error,
        false,
        RecoveryStrategy::Escalate,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_sharing_violation_is_transient_filesystem() {
        let classifier = ErrorClassifier::default();
        let error = CopierError::io_error("OS error 32: sharing violation");
        let info = classifier.classify(&error, "copy", Some(&PathBuf::from("/src/a.svs")));

        assert_eq!(info.category, ErrorCategory::FileSystem);
        assert!(info.transient);
        assert_eq!(info.strategy, RecoveryStrategy::DelayedRetry);
    }

    #[test]
    fn test_access_denied_escalates() {
        let classifier = ErrorClassifier::default();
        let error = CopierError::permission_denied("access denied");
        let info = classifier.classify(&error, "copy", None);

        assert_eq!(info.category, ErrorCategory::Permission);
        assert!(!info.transient);
        assert_eq!(info.strategy, RecoveryStrategy::Escalate);
    }

    #[test]
    fn test_hash_mismatch_quarantines() {
        let classifier = ErrorClassifier::default();
        let error = CopierError::integrity_error("hash mismatch: expected abc, got def");
        let info = classifier.classify(&error, "verify", Some(&PathBuf::from("/src/a.svs")));

        assert_eq!(info.category, ErrorCategory::Verification);
        assert_eq!(info.strategy, RecoveryStrategy::Quarantine);
    }

    #[test]
    fn test_disk_full_escalates_oom_retries() {
        let classifier = ErrorClassifier::default();

        let disk = classifier.classify(&CopierError::resource_exhausted("disk full"), "copy", None);
        assert_eq!(disk.category, ErrorCategory::Resource);
        assert_eq!(disk.strategy, RecoveryStrategy::Escalate);
        assert!(!disk.transient);

        let oom = classifier.classify(&CopierError::resource_exhausted("out of memory"), "hash", None);
        assert_eq!(oom.category, ErrorCategory::Resource);
        assert_eq!(oom.strategy, RecoveryStrategy::DelayedRetry);
        assert!(oom.transient);
    }

    #[test]
    fn test_unknown_errors_escalate() {
        let classifier = ErrorClassifier::default();
        let info = classifier.classify(&CopierError::internal_error("wat"), "copy", None);
        assert_eq!(info.category, ErrorCategory::Unknown);
        assert_eq!(info.strategy, RecoveryStrategy::Escalate);
    }

    #[test]
    fn test_classification_is_idempotent_but_counts_attempts() {
        let classifier = ErrorClassifier::default();
        let error = CopierError::io_error("sharing violation");
        let path = PathBuf::from("/src/a.svs");

        let first = classifier.classify(&error, "copy", Some(&path));
        let second = classifier.classify(&error, "copy", Some(&path));

        assert_eq!(first.category, second.category);
        assert_eq!(first.strategy, second.strategy);
        assert_eq!(first.attempt_count, 1);
        assert_eq!(second.attempt_count, 2);
        assert_eq!(first.first_occurrence, second.first_occurrence);
    }

    #[test]
    fn test_repeated_failures_cross_escalation_threshold() {
        let classifier = ErrorClassifier::new(3, 30);
        let error = CopierError::io_error("sharing violation");
        let path = PathBuf::from("/src/a.svs");

        let first = classifier.classify(&error, "copy", Some(&path));
        assert_eq!(first.strategy, RecoveryStrategy::DelayedRetry);

        classifier.classify(&error, "copy", Some(&path));
        let third = classifier.classify(&error, "copy", Some(&path));
        assert_eq!(third.strategy, RecoveryStrategy::Escalate);
        assert_eq!(third.severity, ErrorSeverity::Error);
        assert_eq!(third.attempt_count, 3);
    }

    #[test]
    fn test_distinct_paths_do_not_share_counters() {
        let classifier = ErrorClassifier::new(3, 30);
        let error = CopierError::io_error("sharing violation");

        classifier.classify(&error, "copy", Some(&PathBuf::from("/src/a.svs")));
        let other = classifier.classify(&error, "copy", Some(&PathBuf::from("/src/b.svs")));
        assert_eq!(other.attempt_count, 1);
        assert_eq!(classifier.history_len(), 2);
    }

    #[test]
    fn test_sweep_is_noop_for_fresh_entries() {
        let classifier = ErrorClassifier::default();
        classifier.classify(&CopierError::io_error("x"), "copy", None);
        assert_eq!(classifier.sweep_history(), 0);
        assert_eq!(classifier.history_len(), 1);
    }

    proptest::proptest! {
        /// Classifying the same error twice yields the same category and
        /// strategy; only the attempt counter grows.
        #[test]
        fn prop_classification_is_stable_per_message(message in ".{0,120}") {
            let classifier = ErrorClassifier::default();
            let error = CopierError::io_error(message);
            let first = classifier.classify(&error, "copy", None);
            let second = classifier.classify(&error, "copy", None);
            proptest::prop_assert_eq!(first.category, second.category);
            proptest::prop_assert_eq!(first.strategy, second.strategy);
            proptest::prop_assert_eq!(first.attempt_count, 1);
            proptest::prop_assert_eq!(second.attempt_count, 2);
        }
    }
}
