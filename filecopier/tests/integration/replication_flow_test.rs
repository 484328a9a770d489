// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Replication-side flows: multi-target happy path, zero-byte sources,
//! disabled targets, counter accounting.

use crate::common;
use filecopier::ReplicationService;
use filecopier_bootstrap::shutdown::CancellationToken;
use std::time::Duration;
use tempfile::TempDir;

/// The canonical two-target happy path: a 2,048-byte slide is replicated to
/// both targets, byte-identical, with the expected counters.
#[tokio::test]
async fn two_targets_receive_identical_bytes() {
    let dir = TempDir::new().unwrap();
    let service = ReplicationService::new(common::service_settings(dir.path())).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    let source = dir.path().join("source/slide_0001.svs");
    let payload: Vec<u8> = (0..2048u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(&source, &payload).unwrap();

    let completed = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 1).await;
    assert!(completed, "stats: {:?}", service.stats());

    let source_hash = common::sha256_hex(&source);
    assert_eq!(common::sha256_hex(&dir.path().join("alpha/slide_0001.svs")), source_hash);
    assert_eq!(common::sha256_hex(&dir.path().join("beta/slide_0001.svs")), source_hash);

    let stats = service.stats();
    assert_eq!(stats.detector.files_detected, 1);
    assert_eq!(stats.detector.files_queued, 1);
    assert_eq!(stats.queue.items_completed, 1);
    assert_eq!(stats.queue.items_failed, 0);

    // The source was never moved or modified
    assert_eq!(std::fs::read(&source).unwrap(), payload);

    cancel.cancel();
    service.shutdown().await;
}

/// Zero-byte sources replicate successfully (SHA-256 of the empty input is
/// well-defined).
#[tokio::test]
async fn zero_byte_source_replicates() {
    let dir = TempDir::new().unwrap();
    let service = ReplicationService::new(common::service_settings(dir.path())).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    std::fs::write(dir.path().join("source/empty.svs"), b"").unwrap();

    let completed = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 1).await;
    assert!(completed, "stats: {:?}", service.stats());

    assert_eq!(std::fs::metadata(dir.path().join("alpha/empty.svs")).unwrap().len(), 0);
    assert_eq!(std::fs::metadata(dir.path().join("beta/empty.svs")).unwrap().len(), 0);
    assert_eq!(service.stats().queue.items_failed, 0);

    cancel.cancel();
    service.shutdown().await;
}

/// Disabled targets are not written to.
#[tokio::test]
async fn disabled_target_is_not_replicated() {
    let dir = TempDir::new().unwrap();
    let mut settings = common::service_settings(dir.path());
    settings
        .directories
        .targets
        .get_mut("beta")
        .unwrap()
        .enabled = false;
    let service = ReplicationService::new(settings).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    std::fs::write(dir.path().join("source/slide.svs"), b"enabled targets only").unwrap();

    let completed = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 1).await;
    assert!(completed, "stats: {:?}", service.stats());

    assert!(dir.path().join("alpha/slide.svs").exists());
    assert!(!dir.path().join("beta/slide.svs").exists());

    cancel.cancel();
    service.shutdown().await;
}

/// No temp-suffix files survive anywhere after a batch of replications.
#[tokio::test]
async fn no_temp_files_remain_after_replication() {
    let dir = TempDir::new().unwrap();
    let service = ReplicationService::new(common::service_settings(dir.path())).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    for i in 0..3 {
        std::fs::write(
            dir.path().join(format!("source/slide_{}.svs", i)),
            vec![i as u8; 4096],
        )
        .unwrap();
    }

    let completed = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 3).await;
    assert!(completed, "stats: {:?}", service.stats());

    let mut stack = vec![dir.path().to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                assert!(
                    !path.to_string_lossy().contains(".copying."),
                    "temp file left behind: {}",
                    path.display()
                );
            }
        }
    }

    cancel.cancel();
    service.shutdown().await;
}
