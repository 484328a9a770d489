// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Detection-side flows: stability under progressive writes, filter
//! behavior, files that vanish before stabilizing.

use crate::common;
use filecopier::ReplicationService;
use filecopier_bootstrap::shutdown::CancellationToken;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

/// A file being written in bursts must not be queued until the writes stop;
/// the final copy carries the complete byte count.
#[tokio::test]
async fn progressive_write_is_copied_only_after_quiescence() {
    let dir = TempDir::new().unwrap();
    let mut settings = common::service_settings(dir.path());
    settings.monitoring.max_stability_checks = 3;
    let service = ReplicationService::new(settings).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    // Write 5,120 bytes in five bursts spaced 300 ms apart
    let source = dir.path().join("source/growing.svs");
    let mut file = std::fs::File::create(&source).unwrap();
    for chunk in 0..5 {
        file.write_all(&vec![chunk as u8; 1024]).unwrap();
        file.sync_all().unwrap();
        // Nothing may be queued while the file is still growing
        assert_eq!(service.stats().queue.items_completed, 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    drop(file);

    let completed = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 1).await;
    assert!(completed, "stats: {:?}", service.stats());

    let copied = std::fs::metadata(dir.path().join("alpha/growing.svs")).unwrap();
    assert_eq!(copied.len(), 5 * 1024);

    cancel.cancel();
    service.shutdown().await;
}

/// Excluded extensions and non-matching globs never enter the pipeline.
#[tokio::test]
async fn filtered_files_are_ignored() {
    let dir = TempDir::new().unwrap();
    let service = ReplicationService::new(common::service_settings(dir.path())).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    std::fs::write(dir.path().join("source/slide.svs.tmp"), b"partial").unwrap();
    std::fs::write(dir.path().join("source/notes.txt"), b"not a slide").unwrap();
    std::fs::write(dir.path().join("source/real.svs"), b"a real slide").unwrap();

    let completed = common::wait_for(Duration::from_secs(30), || service.stats().queue.items_completed == 1).await;
    assert!(completed, "stats: {:?}", service.stats());

    assert!(dir.path().join("alpha/real.svs").exists());
    assert!(!dir.path().join("alpha/slide.svs.tmp").exists());
    assert!(!dir.path().join("alpha/notes.txt").exists());
    assert_eq!(service.stats().queue.items_failed, 0);

    cancel.cancel();
    service.shutdown().await;
}

/// A file that disappears before stabilizing is skipped, not failed.
#[tokio::test]
async fn vanished_file_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut settings = common::service_settings(dir.path());
    settings.monitoring.max_stability_checks = 3;
    let service = ReplicationService::new(settings).unwrap();
    let cancel = CancellationToken::new();
    service.start(cancel.clone()).unwrap();

    let source = dir.path().join("source/fleeting.svs");
    std::fs::write(&source, b"here and gone").unwrap();

    // Give the detector a moment to notice it, then remove it
    let seen = common::wait_for(Duration::from_secs(10), || service.stats().detector.files_detected >= 1).await;
    assert!(seen, "stats: {:?}", service.stats());
    std::fs::remove_file(&source).unwrap();

    let skipped = common::wait_for(Duration::from_secs(10), || service.stats().detector.files_skipped >= 1).await;
    assert!(skipped, "stats: {:?}", service.stats());
    assert_eq!(service.stats().queue.items_completed, 0);
    assert_eq!(service.stats().queue.items_failed, 0);

    cancel.cancel();
    service.shutdown().await;
}
