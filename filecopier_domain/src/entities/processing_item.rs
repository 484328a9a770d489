// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Processing Item Entity
//!
//! The processing queue's unit of work: one source file fanned out to N
//! destinations, each with its own status, byte count, progress, and retry
//! history. The entity owns the state-transition rules; the queue owns the
//! locking (each item sits behind a short per-item mutex while its worker
//! mutates it).
//!
//! ## State rules
//!
//! - overall state is `Completed` iff every destination is `Completed`
//! - overall state is `Failed` iff at least one destination is `Failed` and
//!   none is still `Running` or `Verifying`
//! - once `Completed`, an item never becomes `Failed` (the transition is
//!   monotonic)
//! - per-destination progress percent is monotonically non-decreasing
//!
//! On an item-level retry only the `Failed` destinations are reset to
//! `Pending`; destinations that already completed keep their bytes, progress,
//! and status.

use crate::value_objects::detection_record::DetectionRecord;
use crate::value_objects::error_info::ErrorCategory;
use crate::value_objects::operation_id::OperationId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::PathBuf;

/// Bounded length of the per-item error history ring
pub const ERROR_HISTORY_CAPACITY: usize = 32;

/// Per-destination copy status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DestinationStatus {
    Pending,
    Running,
    Verifying,
    Completed,
    Failed,
}

/// Overall item state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemState {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// One entry in the bounded error history ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub destination: Option<String>,
    pub category: ErrorCategory,
    pub message: String,
}

/// State of a single destination within an item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationEntry {
    target_path: PathBuf,
    status: DestinationStatus,
    bytes_copied: u64,
    progress_percent: f64,
    retry_count: u32,
    last_error: Option<String>,
}

impl DestinationEntry {
    fn new(target_path: PathBuf) -> Self {
        Self {
            target_path,
            status: DestinationStatus::Pending,
            bytes_copied: 0,
            progress_percent: 0.0,
            retry_count: 0,
            last_error: None,
        }
    }

    /// Final path this destination publishes to
    pub fn target_path(&self) -> &PathBuf {
        &self.target_path
    }

    pub fn status(&self) -> DestinationStatus {
        self.status
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied
    }

    pub fn progress_percent(&self) -> f64 {
        self.progress_percent
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// One source file being replicated to every configured destination.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingItem {
    operation_id: OperationId,
    source_path: PathBuf,
    source_size: u64,
    destinations: BTreeMap<String, DestinationEntry>,
    state: ItemState,
    retry_count: u32,
    error_history: VecDeque<ErrorRecord>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl ProcessingItem {
    /// Creates a queued item from a detection record and the configured
    /// destination map (name → final target path).
    pub fn from_detection(record: &DetectionRecord, targets: BTreeMap<String, PathBuf>) -> Self {
        let now = Utc::now();
        let destinations = targets
            .into_iter()
            .map(|(name, path)| (name, DestinationEntry::new(path)))
            .collect();
        Self {
            operation_id: OperationId::new(),
            source_path: record.path().to_path_buf(),
            source_size: record.size(),
            destinations,
            state: ItemState::Queued,
            retry_count: 0,
            error_history: VecDeque::with_capacity(ERROR_HISTORY_CAPACITY),
            created_at: now,
            last_activity: now,
            completed_at: None,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn source_path(&self) -> &PathBuf {
        &self.source_path
    }

    /// Source size observed at detection time
    pub fn source_size(&self) -> u64 {
        self.source_size
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn destinations(&self) -> &BTreeMap<String, DestinationEntry> {
        &self.destinations
    }

    pub fn error_history(&self) -> &VecDeque<ErrorRecord> {
        &self.error_history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Destination names whose status is not `Completed`; the work list for
    /// a fresh attempt or an item-level retry.
    pub fn pending_destinations(&self) -> Vec<String> {
        self.destinations
            .iter()
            .filter(|(_, entry)| entry.status != DestinationStatus::Completed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Mean progress across destinations, in percent
    pub fn overall_progress(&self) -> f64 {
        if self.destinations.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.destinations.values().map(|d| d.progress_percent).sum();
        sum / self.destinations.len() as f64
    }

    /// Marks the item admitted by a worker
    pub fn begin_processing(&mut self) {
        if self.state == ItemState::Queued || self.state == ItemState::Failed {
            self.state = ItemState::Processing;
        }
        self.touch();
    }

    /// Marks a destination's copy as started
    pub fn mark_destination_running(&mut self, name: &str) {
        if let Some(entry) = self.destinations.get_mut(name) {
            entry.status = DestinationStatus::Running;
        }
        self.touch();
    }

    /// Marks a destination's copy done and its verification in flight
    pub fn mark_destination_verifying(&mut self, name: &str) {
        if let Some(entry) = self.destinations.get_mut(name) {
            entry.status = DestinationStatus::Verifying;
        }
        self.touch();
    }

    /// Records copy progress for a destination. Progress percent never moves
    /// backwards.
    pub fn record_destination_progress(&mut self, name: &str, bytes_copied: u64, percent: f64) {
        if let Some(entry) = self.destinations.get_mut(name) {
            entry.bytes_copied = entry.bytes_copied.max(bytes_copied);
            entry.progress_percent = entry.progress_percent.max(percent.clamp(0.0, 100.0));
        }
        self.touch();
    }

    /// Marks a destination fully replicated and verified
    pub fn mark_destination_completed(&mut self, name: &str, bytes_copied: u64) {
        if let Some(entry) = self.destinations.get_mut(name) {
            entry.status = DestinationStatus::Completed;
            entry.bytes_copied = bytes_copied;
            entry.progress_percent = 100.0;
            entry.last_error = None;
        }
        self.touch();
        self.recompute_state();
    }

    /// Marks a destination failed, recording the error on both the entry and
    /// the bounded history ring.
    pub fn mark_destination_failed(&mut self, name: &str, category: ErrorCategory, message: impl Into<String>) {
        let message = message.into();
        if let Some(entry) = self.destinations.get_mut(name) {
            entry.status = DestinationStatus::Failed;
            entry.retry_count += 1;
            entry.last_error = Some(message.clone());
        }
        self.push_error(Some(name.to_string()), category, message);
        self.touch();
        self.recompute_state();
    }

    /// Records an item-level error not tied to one destination (e.g. the
    /// source vanished).
    pub fn record_item_error(&mut self, category: ErrorCategory, message: impl Into<String>) {
        self.push_error(None, category, message.into());
        self.touch();
    }

    /// Forces the item into `Failed` regardless of destination states (stall
    /// detection, cancellation). A `Completed` item is left untouched.
    pub fn force_failed(&mut self, category: ErrorCategory, message: impl Into<String>) {
        if self.state == ItemState::Completed {
            return;
        }
        let message = message.into();
        for entry in self.destinations.values_mut() {
            if entry.status == DestinationStatus::Running || entry.status == DestinationStatus::Verifying {
                entry.status = DestinationStatus::Failed;
                entry.last_error = Some(message.clone());
            }
        }
        self.push_error(None, category, message);
        self.state = ItemState::Failed;
        self.touch();
    }

    /// Prepares an item-level retry: failed destinations go back to
    /// `Pending`, completed ones are untouched, and the retry counter
    /// increments.
    pub fn prepare_retry(&mut self) {
        for entry in self.destinations.values_mut() {
            if entry.status == DestinationStatus::Failed {
                entry.status = DestinationStatus::Pending;
                entry.bytes_copied = 0;
                entry.progress_percent = 0.0;
            }
        }
        self.retry_count += 1;
        self.state = ItemState::Queued;
        self.touch();
    }

    /// Pins a non-completed item to `Failed` without touching destination
    /// entries (terminal bookkeeping after cancellation or exhaustion).
    pub fn mark_failed(&mut self) {
        if self.state != ItemState::Completed {
            self.state = ItemState::Failed;
            self.touch();
        }
    }

    /// Recomputes the overall state from destination states. The
    /// `Completed` state is sticky.
    pub fn recompute_state(&mut self) {
        if self.state == ItemState::Completed {
            return;
        }
        let all_completed = self
            .destinations
            .values()
            .all(|d| d.status == DestinationStatus::Completed);
        let any_failed = self.destinations.values().any(|d| d.status == DestinationStatus::Failed);
        let any_in_flight = self
            .destinations
            .values()
            .any(|d| matches!(d.status, DestinationStatus::Running | DestinationStatus::Verifying));

        if all_completed && !self.destinations.is_empty() {
            self.state = ItemState::Completed;
            self.completed_at = Some(Utc::now());
        } else if any_failed && !any_in_flight {
            self.state = ItemState::Failed;
        }
    }

    /// Refreshes the last-activity timestamp; the stall sweeper compares
    /// against this.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn push_error(&mut self, destination: Option<String>, category: ErrorCategory, message: String) {
        if self.error_history.len() == ERROR_HISTORY_CAPACITY {
            self.error_history.pop_front();
        }
        self.error_history.push_back(ErrorRecord {
            at: Utc::now(),
            destination,
            category,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn two_target_item() -> ProcessingItem {
        let record = DetectionRecord::new(PathBuf::from("/src/a.svs"), Utc::now(), 2048, SystemTime::now(), 3);
        let mut targets = BTreeMap::new();
        targets.insert("primary".to_string(), PathBuf::from("/t1/a.svs"));
        targets.insert("secondary".to_string(), PathBuf::from("/t2/a.svs"));
        ProcessingItem::from_detection(&record, targets)
    }

    #[test]
    fn test_new_item_is_queued_with_pending_destinations() {
        let item = two_target_item();
        assert_eq!(item.state(), ItemState::Queued);
        assert_eq!(item.destinations().len(), 2);
        assert!(item
            .destinations()
            .values()
            .all(|d| d.status() == DestinationStatus::Pending));
        assert_eq!(item.pending_destinations().len(), 2);
    }

    #[test]
    fn test_completed_only_when_all_destinations_complete() {
        let mut item = two_target_item();
        item.begin_processing();
        item.mark_destination_completed("primary", 2048);
        assert_eq!(item.state(), ItemState::Processing);

        item.mark_destination_completed("secondary", 2048);
        assert_eq!(item.state(), ItemState::Completed);
        assert!(item.completed_at().is_some());
    }

    #[test]
    fn test_failed_requires_no_destination_in_flight() {
        let mut item = two_target_item();
        item.begin_processing();
        item.mark_destination_running("primary");
        item.mark_destination_failed("secondary", ErrorCategory::FileSystem, "disk full");
        // primary still running, so the overall state holds at Processing
        assert_eq!(item.state(), ItemState::Processing);

        item.mark_destination_completed("primary", 2048);
        assert_eq!(item.state(), ItemState::Failed);
    }

    #[test]
    fn test_completed_state_is_sticky() {
        let mut item = two_target_item();
        item.begin_processing();
        item.mark_destination_completed("primary", 2048);
        item.mark_destination_completed("secondary", 2048);
        assert_eq!(item.state(), ItemState::Completed);

        item.force_failed(ErrorCategory::Unknown, "late stall");
        assert_eq!(item.state(), ItemState::Completed);
    }

    #[test]
    fn test_retry_resets_only_failed_destinations() {
        let mut item = two_target_item();
        item.begin_processing();
        item.mark_destination_completed("primary", 2048);
        item.mark_destination_failed("secondary", ErrorCategory::FileSystem, "sharing violation");
        assert_eq!(item.state(), ItemState::Failed);

        item.prepare_retry();
        assert_eq!(item.retry_count(), 1);
        assert_eq!(item.state(), ItemState::Queued);
        assert_eq!(item.destinations()["primary"].status(), DestinationStatus::Completed);
        assert_eq!(item.destinations()["primary"].bytes_copied(), 2048);
        assert_eq!(item.destinations()["secondary"].status(), DestinationStatus::Pending);
        assert_eq!(item.pending_destinations(), vec!["secondary".to_string()]);
    }

    #[test]
    fn test_progress_is_monotone_per_destination() {
        let mut item = two_target_item();
        item.record_destination_progress("primary", 1024, 50.0);
        item.record_destination_progress("primary", 512, 25.0);
        assert_eq!(item.destinations()["primary"].progress_percent(), 50.0);
        assert_eq!(item.destinations()["primary"].bytes_copied(), 1024);
    }

    #[test]
    fn test_overall_progress_is_mean_of_destinations() {
        let mut item = two_target_item();
        item.record_destination_progress("primary", 2048, 100.0);
        item.record_destination_progress("secondary", 0, 0.0);
        assert_eq!(item.overall_progress(), 50.0);
    }

    #[test]
    fn test_error_history_ring_is_bounded() {
        let mut item = two_target_item();
        for i in 0..(ERROR_HISTORY_CAPACITY + 8) {
            item.record_item_error(ErrorCategory::Unknown, format!("error {}", i));
        }
        assert_eq!(item.error_history().len(), ERROR_HISTORY_CAPACITY);
        // Oldest entries were evicted
        assert_eq!(item.error_history()[0].message, "error 8");
    }
}
