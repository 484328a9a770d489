// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Replication Service
//!
//! The composition root for the replication pipeline. Owns the lifetimes of
//! the completion detector and the processing queue, forwards detection
//! records from the detector's ready queue into the processing queue through
//! a single consumer task, and exposes aggregate statistics and health.
//!
//! Shutdown order is queue first, then detector: workers stop accepting and
//! drain within the grace period while the detector keeps absorbing (and
//! discarding) filesystem noise, then the watcher itself is torn down.

use crate::infrastructure::config::settings::Settings;
use crate::infrastructure::logging::AuditLog;
use crate::infrastructure::metrics::MetricsService;
use crate::infrastructure::runtime::retry_executor::RetryExecutor;
use crate::infrastructure::services::copy_engine::{CopyEngine, CopyEngineConfig};
use crate::infrastructure::services::recovery::RecoveryService;
use crate::infrastructure::services::verifier::{FileVerifier, VerifierConfig};
use crate::infrastructure::services::watcher::{CompletionDetector, DetectorStatus, WatcherConfig};
use crate::application::services::processing_queue::{ProcessingQueue, QueueConfig, QueueHealth, QueueStatus};
use filecopier_bootstrap::shutdown::CancellationToken;
use filecopier_domain::services::circuit_breaker::CircuitBreaker;
use filecopier_domain::{CopierError, ErrorClassifier};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Aggregate service statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStats {
    pub detector: DetectorStatus,
    pub queue: QueueStatus,
    pub health: QueueHealth,
}

/// Owns and wires the detector and the queue.
pub struct ReplicationService {
    settings: Settings,
    detector: Arc<CompletionDetector>,
    queue: Arc<ProcessingQueue>,
    metrics: Arc<MetricsService>,
    cancel: Mutex<Option<CancellationToken>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationService {
    /// Builds the full pipeline from validated settings.
    pub fn new(settings: Settings) -> Result<Self, CopierError> {
        let metrics = Arc::new(MetricsService::new()?);
        let audit = Arc::new(AuditLog::new(settings.logging.audit_directory.clone())?);
        let classifier = Arc::new(ErrorClassifier::new(
            settings.error_handler.escalation_threshold,
            settings.error_handler.history_retention_days,
        ));
        let recovery = Arc::new(RecoveryService::new(
            settings.directories.quarantine.clone(),
            Arc::clone(&audit),
        )?);
        let retry = Arc::new(RetryExecutor::new(settings.retry_strategies(), CircuitBreaker::default()));

        let chunk_size = settings.chunk_size()?;
        let copier = Arc::new(CopyEngine::new(CopyEngineConfig {
            chunk_size,
            preserve_timestamps: settings.copying.preserve_timestamps,
            ..CopyEngineConfig::default()
        }));
        let verifier = Arc::new(FileVerifier::new(VerifierConfig {
            method: settings.verification.method,
            buffer_size: chunk_size,
            large_file_threshold: settings.large_file_threshold_bytes(),
            enable_large_file_hashing: settings.verification.enable_large_file_hashing,
            timestamp_tolerance: Duration::from_secs(settings.verification.timestamp_tolerance_secs),
            hash_retry_attempts: settings.verification.hash_retry_attempts,
            hash_retry_delay: Duration::from_millis(settings.verification.hash_retry_delay_ms),
            fallback_to_size_timestamp: settings.verification.fallback_to_size_timestamp,
        }));

        let detector = Arc::new(CompletionDetector::new(
            WatcherConfig {
                source_dir: settings.directories.source.clone(),
                include_subdirectories: settings.monitoring.include_subdirectories,
                file_filters: settings.monitoring.file_filters.clone(),
                exclude_extensions: settings.monitoring.exclude_extensions.clone(),
                exclude_prefixes: settings.monitoring.exclude_prefixes.clone(),
                minimum_file_age: settings.minimum_file_age(),
                stability_check_interval: settings.stability_check_interval(),
                max_stability_checks: settings.monitoring.max_stability_checks,
                rescan_interval: settings.rescan_interval(),
            },
            Arc::clone(&metrics),
            Arc::clone(&audit),
        )?);

        let queue = Arc::new(ProcessingQueue::new(
            QueueConfig {
                source_dir: settings.directories.source.clone(),
                destinations: settings.enabled_targets(),
                max_concurrent_operations: settings.copying.max_concurrent_copies,
                max_retries: settings.copying.max_retries,
                retry_delay: settings.item_retry_delay(),
                operation_timeout: settings.operation_timeout(),
                processing_interval: settings.processing_interval(),
                high_queue_threshold: settings.processing.high_queue_threshold,
                max_completed_items: settings.processing.max_completed_items,
                completed_item_retention: settings.completed_item_retention(),
                performance_alert_min_bps: settings.logging.performance_alert_min_mbps * 1024.0 * 1024.0,
            },
            copier,
            verifier,
            retry,
            recovery,
            classifier,
            Arc::clone(&metrics),
            audit,
        ));

        Ok(Self {
            settings,
            detector,
            queue,
            metrics,
            cancel: Mutex::new(None),
            forwarder: Mutex::new(None),
        })
    }

    /// Starts the queue, the detector, and the forwarder task.
    pub fn start(&self, cancel: CancellationToken) -> Result<(), CopierError> {
        *self.cancel.lock() = Some(cancel.clone());
        self.queue.start(cancel.clone());
        self.detector.start(cancel.clone())?;

        let detector = Arc::clone(&self.detector);
        let queue = Arc::clone(&self.queue);
        *self.forwarder.lock() = Some(tokio::spawn(async move {
            let ready = detector.ready_queue();
            while let Some(record) = ready.dequeue(&cancel).await {
                queue.submit(record);
            }
            debug!("forwarder task exited");
        }));

        info!(
            source = %self.settings.directories.source.display(),
            targets = self.settings.enabled_targets().len(),
            "replication service started"
        );
        Ok(())
    }

    /// Stops the pipeline: queue first (bounded by the shutdown timeout),
    /// then the detector, then the forwarder.
    pub async fn shutdown(&self) {
        if let Some(token) = self.cancel.lock().clone() {
            token.cancel();
        }
        self.queue.stop(self.settings.shutdown_timeout()).await;
        self.detector.stop().await;
        if let Some(forwarder) = self.forwarder.lock().take() {
            let _ = forwarder.await;
        }
        info!("replication service stopped");
    }

    /// Aggregate statistics from both subsystems.
    pub fn stats(&self) -> ServiceStats {
        let detector = self.detector.status();
        let queue = self.queue.status();
        let health = self.compose_health(&detector, &queue);
        ServiceStats {
            detector,
            queue,
            health,
        }
    }

    /// Prometheus text exposition of all service metrics.
    pub fn gather_metrics(&self) -> Result<String, CopierError> {
        self.metrics.gather()
    }

    fn compose_health(&self, detector: &DetectorStatus, queue: &QueueStatus) -> QueueHealth {
        if queue.health == QueueHealth::Stopped {
            return QueueHealth::Stopped;
        }
        // A dead detector starves the queue silently; surface it as Error
        if !detector.is_running {
            return QueueHealth::Error;
        }
        queue.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::settings::TargetSettings;
    use tempfile::TempDir;

    fn test_settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.directories.source = dir.path().join("source");
        settings.directories.quarantine = dir.path().join("quarantine");
        settings.logging.audit_directory = dir.path().join("audit");
        settings.directories.targets.insert(
            "primary".into(),
            TargetSettings {
                path: dir.path().join("primary"),
                enabled: true,
            },
        );
        settings.monitoring.minimum_file_age_secs = 0;
        settings.monitoring.stability_check_interval_secs = 1;
        settings.monitoring.max_stability_checks = 1;
        settings.processing.shutdown_timeout_secs = 5;
        std::fs::create_dir_all(&settings.directories.source).unwrap();
        settings
    }

    #[tokio::test]
    async fn test_service_builds_starts_and_stops() {
        let dir = TempDir::new().unwrap();
        let service = ReplicationService::new(test_settings(&dir)).unwrap();
        let cancel = CancellationToken::new();
        service.start(cancel.clone()).unwrap();

        let stats = service.stats();
        assert!(stats.detector.is_running);
        assert_eq!(stats.health, QueueHealth::Healthy);
        assert_eq!(stats.queue.items_completed, 0);

        cancel.cancel();
        service.shutdown().await;
        let stats = service.stats();
        assert!(!stats.detector.is_running);
        assert_eq!(stats.health, QueueHealth::Stopped);
    }

    #[tokio::test]
    async fn test_metrics_are_exposed() {
        let dir = TempDir::new().unwrap();
        let service = ReplicationService::new(test_settings(&dir)).unwrap();
        let rendered = service.gather_metrics().unwrap();
        assert!(rendered.contains("filecopier_files_detected_total"));
    }
}
