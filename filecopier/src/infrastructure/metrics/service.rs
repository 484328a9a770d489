// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Metrics Service
//!
//! Prometheus registry for the replication pipeline. The hot-path counters
//! (bytes copied, items completed) are plain atomic increments; histograms
//! are reserved for copy durations where the distribution matters.
//!
//! There is no embedded HTTP endpoint - the host's probe tooling is out of
//! scope - but [`MetricsService::gather`] renders the standard text format
//! for whatever exporter the deployment wires up.

use filecopier_domain::CopierError;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus metrics for the replication service.
pub struct MetricsService {
    registry: Registry,

    // Detector
    pub files_detected_total: IntCounter,
    pub files_queued_total: IntCounter,
    pub files_skipped_total: IntCounter,
    pub watcher_errors_total: IntCounter,

    // Queue
    pub items_completed_total: IntCounter,
    pub items_failed_total: IntCounter,
    pub items_retried_total: IntCounter,
    pub bytes_copied_total: IntCounter,
    pub verification_failures_total: IntCounter,
    pub files_quarantined_total: IntCounter,
    pub errors_escalated_total: IntCounter,
    pub copy_duration_seconds: Histogram,

    // Gauges refreshed by the maintenance sweep
    pub active_operations: IntGauge,
    pub queue_depth: IntGauge,
    pub circuit_breaker_trips: IntGauge,
}

impl MetricsService {
    pub fn new() -> Result<Self, CopierError> {
        let registry = Registry::new();

        let files_detected_total = IntCounter::with_opts(Opts::new(
            "filecopier_files_detected_total",
            "Files seen by the completion detector",
        ))
        .map_err(metrics_error)?;
        let files_queued_total = IntCounter::with_opts(Opts::new(
            "filecopier_files_queued_total",
            "Files that passed stability checks and were queued",
        ))
        .map_err(metrics_error)?;
        let files_skipped_total = IntCounter::with_opts(Opts::new(
            "filecopier_files_skipped_total",
            "Files dropped before queueing (filtered or vanished)",
        ))
        .map_err(metrics_error)?;
        let watcher_errors_total = IntCounter::with_opts(Opts::new(
            "filecopier_watcher_errors_total",
            "Errors reported by the filesystem watcher",
        ))
        .map_err(metrics_error)?;

        let items_completed_total = IntCounter::with_opts(Opts::new(
            "filecopier_items_completed_total",
            "Items replicated to every destination and verified",
        ))
        .map_err(metrics_error)?;
        let items_failed_total = IntCounter::with_opts(Opts::new(
            "filecopier_items_failed_total",
            "Items that exhausted their retry budget",
        ))
        .map_err(metrics_error)?;
        let items_retried_total = IntCounter::with_opts(Opts::new(
            "filecopier_items_retried_total",
            "Item-level retries scheduled",
        ))
        .map_err(metrics_error)?;
        let bytes_copied_total = IntCounter::with_opts(Opts::new(
            "filecopier_bytes_copied_total",
            "Bytes written to destinations",
        ))
        .map_err(metrics_error)?;
        let verification_failures_total = IntCounter::with_opts(Opts::new(
            "filecopier_verification_failures_total",
            "Verification failures across all destinations",
        ))
        .map_err(metrics_error)?;
        let files_quarantined_total = IntCounter::with_opts(Opts::new(
            "filecopier_files_quarantined_total",
            "Source files moved into quarantine",
        ))
        .map_err(metrics_error)?;
        let errors_escalated_total = IntCounter::with_opts(Opts::new(
            "filecopier_errors_escalated_total",
            "Errors escalated for manual intervention",
        ))
        .map_err(metrics_error)?;
        let copy_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("filecopier_copy_duration_seconds", "Wall-clock duration of multi-target copies")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0, 7200.0]),
        )
        .map_err(metrics_error)?;

        let active_operations = IntGauge::with_opts(Opts::new(
            "filecopier_active_operations",
            "Items currently being processed",
        ))
        .map_err(metrics_error)?;
        let queue_depth = IntGauge::with_opts(Opts::new(
            "filecopier_queue_depth",
            "Ready files waiting for a worker",
        ))
        .map_err(metrics_error)?;
        let circuit_breaker_trips = IntGauge::with_opts(Opts::new(
            "filecopier_circuit_breaker_trips",
            "Circuit-breaker open transitions since startup",
        ))
        .map_err(metrics_error)?;

        for collector in [
            Box::new(files_detected_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(files_queued_total.clone()),
            Box::new(files_skipped_total.clone()),
            Box::new(watcher_errors_total.clone()),
            Box::new(items_completed_total.clone()),
            Box::new(items_failed_total.clone()),
            Box::new(items_retried_total.clone()),
            Box::new(bytes_copied_total.clone()),
            Box::new(verification_failures_total.clone()),
            Box::new(files_quarantined_total.clone()),
            Box::new(errors_escalated_total.clone()),
            Box::new(copy_duration_seconds.clone()),
            Box::new(active_operations.clone()),
            Box::new(queue_depth.clone()),
            Box::new(circuit_breaker_trips.clone()),
        ] {
            registry.register(collector).map_err(metrics_error)?;
        }

        Ok(Self {
            registry,
            files_detected_total,
            files_queued_total,
            files_skipped_total,
            watcher_errors_total,
            items_completed_total,
            items_failed_total,
            items_retried_total,
            bytes_copied_total,
            verification_failures_total,
            files_quarantined_total,
            errors_escalated_total,
            copy_duration_seconds,
            active_operations,
            queue_depth,
            circuit_breaker_trips,
        })
    }

    /// Renders all metrics in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, CopierError> {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .map_err(metrics_error)
    }
}

fn metrics_error(e: prometheus::Error) -> CopierError {
    CopierError::metrics_error(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builds_and_gathers() {
        let metrics = MetricsService::new().unwrap();
        metrics.files_detected_total.inc();
        metrics.bytes_copied_total.inc_by(2048);
        metrics.queue_depth.set(3);

        let rendered = metrics.gather().unwrap();
        assert!(rendered.contains("filecopier_files_detected_total 1"));
        assert!(rendered.contains("filecopier_bytes_copied_total 2048"));
        assert!(rendered.contains("filecopier_queue_depth 3"));
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        // Two services over two registries coexist; the failure mode under
        // test is double-registering within one registry
        let metrics = MetricsService::new().unwrap();
        let duplicate = IntCounter::with_opts(Opts::new(
            "filecopier_files_detected_total",
            "Files seen by the completion detector",
        ))
        .unwrap();
        assert!(metrics.registry.register(Box::new(duplicate)).is_err());
    }
}
