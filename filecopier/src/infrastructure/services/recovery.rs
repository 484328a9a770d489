// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Recovery Service
//!
//! Executes the recovery strategy the classifier chose for an error. The
//! strategies form a small, closed set dispatched by one switch:
//!
//! - **ImmediateRetry** - tell the caller to re-enqueue at once
//! - **DelayedRetry** - sleep the error's retry delay, then re-enqueue
//! - **Escalate** - count it, emit an escalation audit event, hand the
//!   problem to a human
//! - **Quarantine** - move the source file out of the watched tree into the
//!   quarantine directory, named `{error_id}_{original_name}` so it can be
//!   joined back to its audit trail
//! - **Abort** - stop processing the item
//!
//! Quarantine is the only strategy that violates the service's otherwise
//! read-only stance toward sources, and it is best-effort: a rename is
//! attempted first, and a cross-device failure degrades to copy-then-delete.
//! A quarantine that cannot complete is logged, never raised.

use filecopier_domain::events::audit_event::{AuditEvent, AuditEventType};
use filecopier_domain::value_objects::error_info::{ErrorCategory, ErrorInfo, RecoveryStrategy};
use filecopier_domain::CopierError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::infrastructure::logging::AuditLog;

/// Default sleep for `DelayedRetry` when the error carries no explicit delay
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Executes recovery strategies against classified errors.
pub struct RecoveryService {
    quarantine_dir: PathBuf,
    audit: Arc<AuditLog>,
    escalated: AtomicU64,
    quarantined: AtomicU64,
}

impl RecoveryService {
    /// Creates the service, ensuring the quarantine directory exists.
    pub fn new(quarantine_dir: PathBuf, audit: Arc<AuditLog>) -> Result<Self, CopierError> {
        std::fs::create_dir_all(&quarantine_dir).map_err(|e| {
            CopierError::invalid_config(format!(
                "cannot create quarantine directory {}: {}",
                quarantine_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            quarantine_dir,
            audit,
            escalated: AtomicU64::new(0),
            quarantined: AtomicU64::new(0),
        })
    }

    /// Number of errors escalated so far
    pub fn escalated_count(&self) -> u64 {
        self.escalated.load(Ordering::Relaxed)
    }

    /// Number of files quarantined so far
    pub fn quarantined_count(&self) -> u64 {
        self.quarantined.load(Ordering::Relaxed)
    }

    /// Applies `info.strategy`. Returns `true` when the caller should treat
    /// the work as re-enqueueable (or handled), `false` when automation is
    /// done with it.
    pub async fn apply(&self, info: &ErrorInfo) -> bool {
        match info.strategy {
            RecoveryStrategy::ImmediateRetry => true,
            RecoveryStrategy::DelayedRetry => {
                let delay = info
                    .retry_delay_secs()
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_DELAY);
                info!(error_id = %info.error_id, ?delay, "delayed retry");
                tokio::time::sleep(delay).await;
                true
            }
            RecoveryStrategy::Escalate => {
                self.escalate(info);
                false
            }
            RecoveryStrategy::Quarantine => {
                self.quarantine(info).await;
                true
            }
            RecoveryStrategy::Abort => {
                warn!(error_id = %info.error_id, context = %info.operation_context, "aborting item");
                false
            }
        }
    }

    /// Quarantine file name: `{error_id}_{original_name}`.
    pub fn quarantine_path_for(&self, info: &ErrorInfo, source: &Path) -> PathBuf {
        let original = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.quarantine_dir
            .join(format!("{}_{}", info.error_id.as_simple(), original))
    }

    fn escalate(&self, info: &ErrorInfo) {
        self.escalated.fetch_add(1, Ordering::Relaxed);
        error!(
            error_id = %info.error_id,
            category = %info.category,
            context = %info.operation_context,
            attempts = info.attempt_count,
            "error escalated for manual intervention: {}", info.message
        );

        // Permission problems get the security-event treatment; everything
        // else is a plain escalation record
        let event_type = if info.category == ErrorCategory::Permission {
            AuditEventType::SecurityEvent
        } else {
            AuditEventType::ErrorEscalated
        };
        let mut event = AuditEvent::new(event_type, format!("escalated: {}", info.message))
            .with_property("error_id", info.error_id.to_string())
            .with_property("category", info.category.to_string())
            .with_property("attempts", info.attempt_count.to_string());
        if let Some(ref path) = info.file_path {
            event = event.with_path(path);
        }
        self.audit.record(event);
    }

    async fn quarantine(&self, info: &ErrorInfo) {
        let Some(ref source) = info.file_path else {
            warn!(error_id = %info.error_id, "quarantine requested without a file path");
            return;
        };
        let destination = self.quarantine_path_for(info, source);

        match move_file(source, &destination).await {
            Ok(()) => {
                self.quarantined.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error_id = %info.error_id,
                    from = %source.display(),
                    to = %destination.display(),
                    "source file quarantined"
                );
                self.audit.record(
                    AuditEvent::new(
                        AuditEventType::FileQuarantined,
                        format!("quarantined after {}: {}", info.category, info.message),
                    )
                    .with_path(source)
                    .with_property("error_id", info.error_id.to_string())
                    .with_property("quarantine_path", destination.display().to_string()),
                );
            }
            Err(e) => {
                // A failed quarantine must not take the service down with it
                error!(
                    error_id = %info.error_id,
                    from = %source.display(),
                    to = %destination.display(),
                    error = %e,
                    "quarantine move failed"
                );
            }
        }
    }
}

/// Rename when possible, copy-then-delete when the quarantine directory is
/// on another device.
async fn move_file(from: &Path, to: &Path) -> Result<(), CopierError> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tokio::fs::copy(from, to).await.map_err(|copy_err| {
                CopierError::QuarantineError(format!(
                    "rename failed ({}), copy fallback failed ({})",
                    rename_err, copy_err
                ))
            })?;
            tokio::fs::remove_file(from).await.map_err(CopierError::from)?;
            Ok(())
        }
    }
}
