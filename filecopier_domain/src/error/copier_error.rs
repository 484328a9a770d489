// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! A single, cloneable error type for the replication domain. Every failure
//! surfaced by the copy engine, the verifier, the watcher, or the processing
//! queue is expressed as a `CopierError` variant so the error classifier can
//! map it onto a category and a recovery strategy.
//!
//! ## Design Principles
//!
//! - **Specific**: each variant names a distinct failure mode
//! - **Actionable**: messages carry the path / operation that failed
//! - **Cloneable**: errors travel into item error histories and audit events
//!   without ownership gymnastics
//! - **Interoperable**: `std::io::Error` and `serde_json::Error` convert
//!   automatically, preserving the original message text so substring-based
//!   classification still works
//!
//! Retriability is *not* decided here. The classifier (services layer) and
//! the retry policies own that decision; this type only has to keep enough
//! of the original message for them to match on.

use thiserror::Error;

/// Domain-specific errors for the file replication system.
///
/// Variants carry human-readable messages rather than source errors so the
/// type stays `Clone` - error records are duplicated into item histories,
/// audit events, and retry attempt logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CopierError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Integrity check failed: {0}")]
    IntegrityError(String),

    #[error("Verification error: {0}")]
    VerificationError(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Operation stalled: {0}")]
    Stalled(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Quarantine error: {0}")]
    QuarantineError(String),

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CopierError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new IO error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::IoError(msg.into())
    }

    /// Creates a new file-not-found error
    pub fn file_not_found(msg: impl Into<String>) -> Self {
        Self::FileNotFound(msg.into())
    }

    /// Creates a new permission error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Creates a new integrity error
    pub fn integrity_error(msg: impl Into<String>) -> Self {
        Self::IntegrityError(msg.into())
    }

    /// Creates a new resource exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Creates a new timeout error
    pub fn timeout_error(msg: impl Into<String>) -> Self {
        Self::TimeoutError(msg.into())
    }

    /// Creates a new cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Creates a new metrics error
    pub fn metrics_error(msg: impl Into<String>) -> Self {
        Self::MetricsError(msg.into())
    }

    /// Checks whether the error names a condition worth retrying blindly.
    ///
    /// The retry policies make the real decision via pattern matching; this
    /// is a coarse pre-filter used by callers without a policy in hand.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CopierError::IoError(_)
                | CopierError::NetworkError(_)
                | CopierError::TimeoutError(_)
                | CopierError::ResourceExhausted(_)
        )
    }

    /// Gets the error category label used in logs and audit records
    pub fn error_category(&self) -> &'static str {
        match self {
            CopierError::InvalidConfiguration(_) => "configuration",
            CopierError::IoError(_) => "io",
            CopierError::FileNotFound(_) => "io",
            CopierError::PermissionDenied(_) => "permission",
            CopierError::IntegrityError(_) => "integrity",
            CopierError::VerificationError(_) => "verification",
            CopierError::ResourceExhausted(_) => "resource",
            CopierError::NetworkError(_) => "network",
            CopierError::TimeoutError(_) => "timeout",
            CopierError::Stalled(_) => "stalled",
            CopierError::Cancelled(_) => "cancellation",
            CopierError::QuarantineError(_) => "quarantine",
            CopierError::CircuitOpen(_) => "circuit",
            CopierError::SerializationError(_) => "serialization",
            CopierError::MetricsError(_) => "metrics",
            CopierError::InternalError(_) => "internal",
        }
    }
}

// Errors travel inside serializable records (verification outcomes, audit
// payloads); represent them by message text on the wire.
impl serde::Serialize for CopierError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for CopierError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let message = <String as serde::Deserialize>::deserialize(deserializer)?;
        Ok(CopierError::InternalError(message))
    }
}

impl From<std::io::Error> for CopierError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        // Keep the kind visible in the message: classification downstream is
        // substring-based and the raw OS text alone is not always enough.
        match err.kind() {
            ErrorKind::NotFound => CopierError::FileNotFound(err.to_string()),
            ErrorKind::PermissionDenied => CopierError::PermissionDenied(err.to_string()),
            ErrorKind::TimedOut => CopierError::TimeoutError(err.to_string()),
            ErrorKind::OutOfMemory => CopierError::ResourceExhausted(format!("out of memory: {}", err)),
            ErrorKind::StorageFull => CopierError::ResourceExhausted(format!("disk full: {}", err)),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                CopierError::NetworkError(err.to_string())
            }
            _ => CopierError::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CopierError {
    fn from(err: serde_json::Error) -> Self {
        CopierError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(CopierError::io_error("x").error_category(), "io");
        assert_eq!(CopierError::permission_denied("x").error_category(), "permission");
        assert_eq!(CopierError::integrity_error("x").error_category(), "integrity");
        assert_eq!(CopierError::cancelled("x").error_category(), "cancellation");
    }

    #[test]
    fn test_io_error_conversion_maps_kinds() {
        let nf = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        assert!(matches!(CopierError::from(nf), CopierError::FileNotFound(_)));

        let pd = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        assert!(matches!(CopierError::from(pd), CopierError::PermissionDenied(_)));

        let cr = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        assert!(matches!(CopierError::from(cr), CopierError::NetworkError(_)));
    }

    #[test]
    fn test_conversion_preserves_message_text() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "sharing violation on handle");
        let copier = CopierError::from(err);
        assert!(copier.to_string().contains("sharing violation"));
    }

    #[test]
    fn test_transient_prefilter() {
        assert!(CopierError::timeout_error("t").is_transient());
        assert!(!CopierError::permission_denied("p").is_transient());
        assert!(!CopierError::integrity_error("i").is_transient());
    }
}
