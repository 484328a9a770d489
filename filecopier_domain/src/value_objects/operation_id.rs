// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Typed Identifiers
//!
//! Newtype wrappers over UUIDv4 for the two identifier kinds the system
//! mints: operation ids (one per `ProcessingItem`, reused in temp-file
//! suffixes, circuit-breaker keys, and audit events) and error ids (one per
//! classified error, reused in quarantine file names).
//!
//! Keeping the two as distinct types prevents an error id from ever being
//! passed where an operation id is expected; the compiler enforces what a
//! bare `Uuid` could not.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier minted when a `DetectionRecord` becomes a
/// `ProcessingItem`.
///
/// Rendered without hyphens in file names (temp suffix
/// `.copying.{operation_id}`) so path length stays predictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Mints a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID (used by tests and deserialization paths)
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Compact hyphen-less rendering for use inside file names
    pub fn as_simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier attached to every classified error.
///
/// Quarantined files are renamed to `{error_id}_{original_name}` so a later
/// investigation can join the file back to its audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorId(Uuid);

impl ErrorId {
    /// Mints a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Compact hyphen-less rendering for use inside file names
    pub fn as_simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for ErrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_ids_are_unique() {
        let a = OperationId::new();
        let b = OperationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_simple_rendering_has_no_hyphens() {
        let id = OperationId::new();
        assert_eq!(id.as_simple().len(), 32);
        assert!(!id.as_simple().contains('-'));
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = ErrorId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ErrorId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
