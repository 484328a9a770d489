// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Detection Record
//!
//! The record the completion detector emits once a watched file has proven
//! stable: matching size and modification time across the configured number
//! of consecutive polls, and older than the minimum file age. It is the sole
//! interface between the detector and the processing queue.
//!
//! A record is a snapshot, not a live handle - the file can still change or
//! vanish between detection and copy, and the queue must handle both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Immutable description of a file observed to be complete and ready to
/// replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    path: PathBuf,
    detected_at: DateTime<Utc>,
    queued_at: DateTime<Utc>,
    size: u64,
    modified: SystemTime,
    stable_checks: u32,
}

impl DetectionRecord {
    /// Creates a record for a file that has just passed its final stability
    /// check. `detected_at` is when the path first entered the pending map;
    /// `queued_at` is stamped now.
    pub fn new(
        path: PathBuf,
        detected_at: DateTime<Utc>,
        size: u64,
        modified: SystemTime,
        stable_checks: u32,
    ) -> Self {
        Self {
            path,
            detected_at,
            queued_at: Utc::now(),
            size,
            modified,
            stable_checks,
        }
    }

    /// Absolute path of the source file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the watcher first saw the path
    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    /// When the record was placed on the ready queue
    pub fn queued_at(&self) -> DateTime<Utc> {
        self.queued_at
    }

    /// File size observed at the final stability check
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last-modified timestamp observed at the final stability check
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Number of consecutive stable polls the file passed
    pub fn stable_checks(&self) -> u32 {
        self.stable_checks
    }

    /// File name component, lossily rendered for logs and audit events
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_snapshot_fields() {
        let detected = Utc::now();
        let modified = SystemTime::now();
        let record = DetectionRecord::new(PathBuf::from("/data/slide_001.svs"), detected, 2048, modified, 3);

        assert_eq!(record.path(), Path::new("/data/slide_001.svs"));
        assert_eq!(record.size(), 2048);
        assert_eq!(record.stable_checks(), 3);
        assert_eq!(record.detected_at(), detected);
        assert!(record.queued_at() >= detected);
        assert_eq!(record.file_name(), "slide_001.svs");
    }
}
