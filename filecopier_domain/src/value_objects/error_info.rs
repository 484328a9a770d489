// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Error Classification Records
//!
//! The structured output of the error classifier: a category, a severity, a
//! transient flag, and a recommended recovery strategy, together with the
//! identifiers and context the recovery layer needs to act on it.
//!
//! The taxonomy is deliberately small. Six categories cover every failure
//! the replication pipeline can produce, and five strategies cover every
//! response the recovery layer knows how to execute. Anything the rules
//! cannot place lands in `Unknown`/`Escalate` so a human sees it.

use crate::value_objects::operation_id::ErrorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Failure category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    FileSystem,
    Network,
    Permission,
    Verification,
    Resource,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorCategory::FileSystem => "FileSystem",
            ErrorCategory::Network => "Network",
            ErrorCategory::Permission => "Permission",
            ErrorCategory::Verification => "Verification",
            ErrorCategory::Resource => "Resource",
            ErrorCategory::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Severity assigned by the classifier; bumped on repeated occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    /// One step up the severity ladder, saturating at `Critical`
    pub fn escalated(self) -> Self {
        match self {
            ErrorSeverity::Info => ErrorSeverity::Warning,
            ErrorSeverity::Warning => ErrorSeverity::Error,
            ErrorSeverity::Error | ErrorSeverity::Critical => ErrorSeverity::Critical,
        }
    }
}

/// What the recovery layer should do with a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    /// Re-enqueue at once
    ImmediateRetry,
    /// Sleep, then re-enqueue
    DelayedRetry,
    /// Count, emit an escalation event, give up on automation
    Escalate,
    /// Move the source file into the quarantine directory
    Quarantine,
    /// Stop processing the item outright
    Abort,
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RecoveryStrategy::ImmediateRetry => "ImmediateRetry",
            RecoveryStrategy::DelayedRetry => "DelayedRetry",
            RecoveryStrategy::Escalate => "Escalate",
            RecoveryStrategy::Quarantine => "Quarantine",
            RecoveryStrategy::Abort => "Abort",
        };
        f.write_str(label)
    }
}

/// Structured classification of a single failure occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Unique id; reused in quarantine file names and audit events
    pub error_id: ErrorId,
    /// When this `operation:path` pair first failed
    pub first_occurrence: DateTime<Utc>,
    /// How many times this `operation:path` pair has been classified
    pub attempt_count: u32,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// Whether the underlying condition is expected to clear on its own
    pub transient: bool,
    pub strategy: RecoveryStrategy,
    /// The operation that failed, e.g. `copy` or `verify`
    pub operation_context: String,
    /// The file the operation was acting on, when known
    pub file_path: Option<PathBuf>,
    /// Original error message
    pub message: String,
    /// Free-form properties consumed by recovery (e.g. `retry_delay_secs`)
    pub properties: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Retry-delay property consumed by the `DelayedRetry` strategy
    pub const PROP_RETRY_DELAY_SECS: &'static str = "retry_delay_secs";

    /// Parses the recovery retry delay property, if present and valid
    pub fn retry_delay_secs(&self) -> Option<u64> {
        self.properties
            .get(Self::PROP_RETRY_DELAY_SECS)
            .and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_escalation_saturates() {
        assert_eq!(ErrorSeverity::Info.escalated(), ErrorSeverity::Warning);
        assert_eq!(ErrorSeverity::Warning.escalated(), ErrorSeverity::Error);
        assert_eq!(ErrorSeverity::Error.escalated(), ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Critical.escalated(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_retry_delay_property_parsing() {
        let mut properties = BTreeMap::new();
        properties.insert(ErrorInfo::PROP_RETRY_DELAY_SECS.to_string(), "30".to_string());
        let info = ErrorInfo {
            error_id: ErrorId::new(),
            first_occurrence: Utc::now(),
            attempt_count: 1,
            category: ErrorCategory::FileSystem,
            severity: ErrorSeverity::Warning,
            transient: true,
            strategy: RecoveryStrategy::DelayedRetry,
            operation_context: "copy".into(),
            file_path: None,
            message: "sharing violation".into(),
            properties,
        };
        assert_eq!(info.retry_delay_secs(), Some(30));
    }
}
