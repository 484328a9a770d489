// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Audit Events
//!
//! The auditable record of every file the service touches. Each significant
//! transition emits one event; the infrastructure sink appends them as JSON
//! lines so an operator can reconstruct the history of any slide after the
//! fact.

use crate::value_objects::operation_id::OperationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Kinds of audit events the service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    FileDetected,
    FileCopyStarted,
    FileCopyCompleted,
    FileCopyFailed,
    VerificationFailed,
    FileQuarantined,
    ErrorEscalated,
    PerformanceAlert,
    SecurityEvent,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AuditEventType::FileDetected => "FileDetected",
            AuditEventType::FileCopyStarted => "FileCopyStarted",
            AuditEventType::FileCopyCompleted => "FileCopyCompleted",
            AuditEventType::FileCopyFailed => "FileCopyFailed",
            AuditEventType::VerificationFailed => "VerificationFailed",
            AuditEventType::FileQuarantined => "FileQuarantined",
            AuditEventType::ErrorEscalated => "ErrorEscalated",
            AuditEventType::PerformanceAlert => "PerformanceAlert",
            AuditEventType::SecurityEvent => "SecurityEvent",
        };
        f.write_str(label)
    }
}

/// A single auditable occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub operation_id: Option<OperationId>,
    pub file_path: Option<PathBuf>,
    pub message: String,
    pub properties: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Creates an event stamped now.
    pub fn new(event_type: AuditEventType, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            operation_id: None,
            file_path: None,
            message: message.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Attaches the operation id
    pub fn with_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// Attaches the subject file path
    pub fn with_path(mut self, path: &Path) -> Self {
        self.file_path = Some(path.to_path_buf());
        self
    }

    /// Attaches one free-form property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let op = OperationId::new();
        let event = AuditEvent::new(AuditEventType::FileCopyCompleted, "copied")
            .with_operation(op)
            .with_path(Path::new("/src/a.svs"))
            .with_property("bytes", "2048");

        assert_eq!(event.event_type, AuditEventType::FileCopyCompleted);
        assert_eq!(event.operation_id, Some(op));
        assert_eq!(event.properties["bytes"], "2048");
    }

    #[test]
    fn test_round_trips_through_json() {
        let event = AuditEvent::new(AuditEventType::FileDetected, "seen").with_path(Path::new("/src/a.svs"));
        let line = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(event, back);
    }
}
