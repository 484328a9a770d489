// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end suite: full service lifecycle with subdirectories, the audit
//! trail, and graceful shutdown.

mod common;

use chrono::Utc;
use filecopier::ReplicationService;
use filecopier_bootstrap::shutdown::CancellationToken;
use filecopier_domain::events::audit_event::{AuditEvent, AuditEventType};
use std::time::Duration;
use tempfile::TempDir;

/// Nested source structure is mirrored at every target, the audit trail
/// records the lifecycle, and shutdown leaves a Stopped service.
#[tokio::test]
async fn full_lifecycle_with_subdirectories_and_audit_trail() {
    let dir = TempDir::new().unwrap();
    let mut settings = common::service_settings(dir.path());
    settings.monitoring.include_subdirectories = true;
    let service = ReplicationService::new(settings).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    let nested = dir.path().join("source/2025/batch_07");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(nested.join("slide.svs"), vec![42u8; 8192]).unwrap();

    let completed = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 1).await;
    assert!(completed, "stats: {:?}", service.stats());

    // Relative structure mirrored at both targets
    for target in ["alpha", "beta"] {
        let replicated = dir.path().join(target).join("2025/batch_07/slide.svs");
        assert!(replicated.exists(), "missing {}", replicated.display());
        assert_eq!(std::fs::metadata(&replicated).unwrap().len(), 8192);
    }

    // Metrics text exposition is rendered and carries the counters
    let metrics = service.gather_metrics().unwrap();
    assert!(metrics.contains("filecopier_items_completed_total 1"));

    cancel.cancel();
    service.shutdown().await;

    // Audit trail: detection and completion events for the slide
    let audit_file = dir
        .path()
        .join("audit")
        .join(format!("audit-{}.jsonl", Utc::now().format("%Y%m%d")));
    let contents = std::fs::read_to_string(&audit_file).unwrap();
    let events: Vec<AuditEvent> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert!(events.iter().any(|e| e.event_type == AuditEventType::FileDetected));
    assert!(events.iter().any(|e| e.event_type == AuditEventType::FileCopyStarted));
    let completed_event = events
        .iter()
        .find(|e| e.event_type == AuditEventType::FileCopyCompleted)
        .expect("completion event missing");
    assert!(completed_event.operation_id.is_some());
    assert_eq!(completed_event.properties["destinations"], "2");
}

/// Files arriving while the service is running are picked up continuously,
/// and stop() is idempotent against an empty pipeline.
#[tokio::test]
async fn continuous_operation_and_clean_shutdown() {
    let dir = TempDir::new().unwrap();
    let service = ReplicationService::new(common::service_settings(dir.path())).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    std::fs::write(dir.path().join("source/first.svs"), b"first wave").unwrap();
    let first = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 1).await;
    assert!(first, "stats: {:?}", service.stats());

    std::fs::write(dir.path().join("source/second.svs"), b"second wave").unwrap();
    let second = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 2).await;
    assert!(second, "stats: {:?}", service.stats());

    cancel.cancel();
    service.shutdown().await;

    let stats = service.stats();
    assert_eq!(stats.queue.items_completed, 2);
    assert!(!stats.detector.is_running);
}
