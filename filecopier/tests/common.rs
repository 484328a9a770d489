// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Shared helpers for the integration and e2e suites.

use filecopier::infrastructure::config::settings::{Settings, TargetSettings};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, Instant};

/// Settings tuned for test speed: two targets, 1-second stability polls,
/// two stability checks, no minimum age, rescan every second.
pub fn service_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.directories.source = root.join("source");
    settings.directories.quarantine = root.join("quarantine");
    settings.logging.audit_directory = root.join("audit");
    for name in ["alpha", "beta"] {
        settings.directories.targets.insert(
            name.to_string(),
            TargetSettings {
                path: root.join(name),
                enabled: true,
            },
        );
    }
    settings.monitoring.file_filters = vec!["*.svs".to_string()];
    settings.monitoring.minimum_file_age_secs = 0;
    settings.monitoring.stability_check_interval_secs = 1;
    settings.monitoring.max_stability_checks = 2;
    settings.monitoring.rescan_interval_secs = 1;
    settings.processing.retry_delay_minutes = 0;
    settings.processing.shutdown_timeout_secs = 10;
    std::fs::create_dir_all(&settings.directories.source).unwrap();
    settings
}

/// Polls `predicate` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    predicate()
}

/// Streaming SHA-256 of a file as lowercase hex.
pub fn sha256_hex(path: &Path) -> String {
    let bytes = std::fs::read(path).unwrap();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}
