// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Processing Queue
//!
//! The top-level scheduler: takes ready files from the completion detector
//! and fans each one out to every enabled destination under bounded
//! concurrency, driving the copy engine, the verifier, the retry executor,
//! the classifier, and the recovery service.
//!
//! ## Item lifecycle
//!
//! ```text
//! Queued ──admit──▶ Processing ──all-destinations-done──▶ Completed
//!                       │                                    │
//!                       │ any destination exhausts           ▼
//!                       └──retries──────▶ Failed        (retention sweep)
//! ```
//!
//! A worker pool sized by `max_concurrent_operations` consumes the internal
//! work queue behind an admission semaphore of the same size. Per item, one
//! multi-target streaming copy runs under the `FileSystem` retry policy,
//! then each destination is verified under the `Verification` policy with
//! the source digest computed once and shared. Item-level retries re-run
//! only the destinations that failed; completed destinations keep their
//! state.
//!
//! A maintenance task sweeps for stalled items (no activity within the
//! operation timeout - their in-flight copies are cancelled at the next
//! chunk boundary), evicts old completed items, refreshes gauge metrics,
//! and prunes the classifier history.

use crate::infrastructure::logging::AuditLog;
use crate::infrastructure::metrics::MetricsService;
use crate::infrastructure::services::copy_engine::{CopyService, ProgressCallback};
use crate::infrastructure::services::recovery::RecoveryService;
use crate::infrastructure::services::verifier::VerificationService;
use crate::infrastructure::runtime::retry_executor::RetryExecutor;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use filecopier_bootstrap::shutdown::CancellationToken;
use filecopier_domain::events::audit_event::{AuditEvent, AuditEventType};
use filecopier_domain::value_objects::error_info::{ErrorInfo, RecoveryStrategy};
use filecopier_domain::{
    CopierError, DetectionRecord, ErrorClassifier, ItemState, OperationId, ProcessingItem,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Window used for the recent-failure-rate health signal
const RECENT_OUTCOME_WINDOW: usize = 100;

/// Queue configuration, resolved from the `processing`/`copying` settings
/// sections plus the destination map.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub source_dir: PathBuf,
    /// Destination name → target directory
    pub destinations: BTreeMap<String, PathBuf>,
    pub max_concurrent_operations: usize,
    /// Item-level retry budget
    pub max_retries: u32,
    /// Delay before an item-level retry re-enters the work queue
    pub retry_delay: Duration,
    /// An active item with no activity for this long is stalled
    pub operation_timeout: Duration,
    /// Maintenance sweep cadence
    pub processing_interval: Duration,
    pub high_queue_threshold: usize,
    pub max_completed_items: usize,
    pub completed_item_retention: Duration,
    /// Average copy speed floor in bytes/s for performance alerts; 0 disables
    pub performance_alert_min_bps: f64,
}

/// Queue health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum QueueHealth {
    Healthy,
    Warning,
    Error,
    Stopped,
}

/// Queue status snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub queued_count: usize,
    pub active_count: usize,
    pub completed_count: usize,
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_retried: u64,
    pub health: QueueHealth,
}

type ItemHandle = Arc<Mutex<ProcessingItem>>;

enum WorkEntry {
    Fresh(DetectionRecord),
    Retry(ItemHandle),
}

struct ActiveEntry {
    item: ItemHandle,
    cancel: CancellationToken,
    stalled: Arc<AtomicBool>,
}

struct CompletedEntry {
    snapshot: ProcessingItem,
    finished_at: DateTime<Utc>,
}

/// Bounded-concurrency scheduler for ready files.
pub struct ProcessingQueue {
    config: QueueConfig,
    copier: Arc<dyn CopyService>,
    verifier: Arc<dyn VerificationService>,
    retry: Arc<RetryExecutor>,
    recovery: Arc<RecoveryService>,
    classifier: Arc<ErrorClassifier>,
    metrics: Arc<MetricsService>,
    audit: Arc<AuditLog>,

    work: SegQueue<WorkEntry>,
    work_notify: Notify,
    semaphore: Arc<Semaphore>,
    active: Mutex<HashMap<OperationId, ActiveEntry>>,
    completed: Mutex<HashMap<OperationId, CompletedEntry>>,
    recent_outcomes: Mutex<VecDeque<bool>>,

    items_completed: AtomicU64,
    items_failed: AtomicU64,
    items_retried: AtomicU64,

    stopped: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessingQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: QueueConfig,
        copier: Arc<dyn CopyService>,
        verifier: Arc<dyn VerificationService>,
        retry: Arc<RetryExecutor>,
        recovery: Arc<RecoveryService>,
        classifier: Arc<ErrorClassifier>,
        metrics: Arc<MetricsService>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let permits = config.max_concurrent_operations.max(1);
        Self {
            config,
            copier,
            verifier,
            retry,
            recovery,
            classifier,
            metrics,
            audit,
            work: SegQueue::new(),
            work_notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(permits)),
            active: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            recent_outcomes: Mutex::new(VecDeque::with_capacity(RECENT_OUTCOME_WINDOW)),
            items_completed: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            items_retried: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the worker pool and the maintenance task.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        *self.cancel.lock() = Some(cancel.clone());
        let mut tasks = self.tasks.lock();
        for worker_id in 0..self.config.max_concurrent_operations.max(1) {
            tasks.push(tokio::spawn(Self::worker_loop(
                Arc::clone(self),
                cancel.clone(),
                worker_id,
            )));
        }
        tasks.push(tokio::spawn(Self::maintenance_loop(Arc::clone(self), cancel)));
        info!(
            workers = self.config.max_concurrent_operations.max(1),
            destinations = self.config.destinations.len(),
            "processing queue started"
        );
    }

    /// Accepts a ready file for replication. Records arriving after `stop`
    /// are dropped.
    pub fn submit(&self, record: DetectionRecord) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(path = %record.path().display(), "queue stopped, dropping ready file");
            return;
        }
        self.work.push(WorkEntry::Fresh(record));
        self.work_notify.notify_one();
    }

    /// Signals workers, waits up to the shutdown timeout for active items to
    /// finish, then aborts whatever remains.
    pub async fn stop(&self, shutdown_timeout: Duration) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(token) = self.cancel.lock().clone() {
            token.cancel();
        }
        for entry in self.active.lock().values() {
            entry.cancel.cancel();
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let deadline = tokio::time::Instant::now() + shutdown_timeout;
        for mut task in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                warn!("queue task did not stop within the shutdown timeout, aborting");
                task.abort();
            }
        }
        info!("processing queue stopped");
    }

    /// Status snapshot for health reporting.
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queued_count: self.work.len(),
            active_count: self.active.lock().len(),
            completed_count: self.completed.lock().len(),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_retried: self.items_retried.load(Ordering::Relaxed),
            health: self.health_status(),
        }
    }

    /// `Stopped` after stop, `Error` when a pool task died, `Warning` on a
    /// deep queue or a recent failure rate above 25%.
    pub fn health_status(&self) -> QueueHealth {
        if self.stopped.load(Ordering::SeqCst) {
            return QueueHealth::Stopped;
        }
        if self.tasks.lock().iter().any(|t| t.is_finished()) {
            return QueueHealth::Error;
        }
        if self.work.len() > self.config.high_queue_threshold {
            return QueueHealth::Warning;
        }
        let outcomes = self.recent_outcomes.lock();
        if !outcomes.is_empty() {
            let failures = outcomes.iter().filter(|ok| !**ok).count();
            if failures * 4 > outcomes.len() {
                return QueueHealth::Warning;
            }
        }
        QueueHealth::Healthy
    }

    /// Snapshot of one active or completed item, for observability.
    pub fn item_snapshot(&self, operation_id: OperationId) -> Option<ProcessingItem> {
        if let Some(entry) = self.active.lock().get(&operation_id) {
            return Some(entry.item.lock().clone());
        }
        self.completed.lock().get(&operation_id).map(|e| e.snapshot.clone())
    }

    async fn worker_loop(self: Arc<Self>, cancel: CancellationToken, worker_id: usize) {
        debug!(worker_id, "worker started");
        loop {
            let Some(entry) = self.next_work(&cancel).await else {
                break;
            };
            let permit = tokio::select! {
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };
            self.process_entry(entry).await;
            drop(permit);
        }
        debug!(worker_id, "worker exited");
    }

    async fn next_work(&self, cancel: &CancellationToken) -> Option<WorkEntry> {
        loop {
            if let Some(entry) = self.work.pop() {
                return Some(entry);
            }
            if cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.work_notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    async fn process_entry(self: &Arc<Self>, entry: WorkEntry) {
        let handle = match entry {
            WorkEntry::Fresh(record) => Arc::new(Mutex::new(self.build_item(&record))),
            WorkEntry::Retry(handle) => handle,
        };
        let operation_id = handle.lock().operation_id();
        let item_cancel = CancellationToken::new();
        let stalled = Arc::new(AtomicBool::new(false));
        self.active.lock().insert(
            operation_id,
            ActiveEntry {
                item: Arc::clone(&handle),
                cancel: item_cancel.clone(),
                stalled: Arc::clone(&stalled),
            },
        );
        self.execute_item(&handle, item_cancel, stalled).await;
    }

    fn build_item(&self, record: &DetectionRecord) -> ProcessingItem {
        // Subdirectory structure below the source root is mirrored at every
        // destination
        let relative = record.path().strip_prefix(&self.config.source_dir).ok();
        let targets: BTreeMap<String, PathBuf> = self
            .config
            .destinations
            .iter()
            .map(|(name, dir)| {
                let target = match relative {
                    Some(rel) => dir.join(rel),
                    None => dir.join(record.file_name()),
                };
                (name.clone(), target)
            })
            .collect();
        ProcessingItem::from_detection(record, targets)
    }

    async fn execute_item(self: &Arc<Self>, handle: &ItemHandle, item_cancel: CancellationToken, stalled: Arc<AtomicBool>) {
        let (operation_id, source, pending) = {
            let mut item = handle.lock();
            item.begin_processing();
            let pending: Vec<(String, PathBuf)> = item
                .pending_destinations()
                .into_iter()
                .map(|name| {
                    let path = item.destinations()[&name].target_path().clone();
                    (name, path)
                })
                .collect();
            for (name, _) in &pending {
                item.mark_destination_running(name);
            }
            (item.operation_id(), item.source_path().clone(), pending)
        };

        if pending.is_empty() {
            // Nothing left to do; a stray retry with all destinations done
            {
                let mut item = handle.lock();
                item.recompute_state();
            }
            self.finish_completed(handle).await;
            return;
        }

        self.audit.record(
            AuditEvent::new(AuditEventType::FileCopyStarted, "replication started")
                .with_operation(operation_id)
                .with_path(&source)
                .with_property("destinations", pending.len().to_string())
                .with_property("attempt", (handle.lock().retry_count() + 1).to_string()),
        );

        // Source gone between detection and copy: fail the item outright,
        // never retry
        if !matches!(tokio::fs::try_exists(&source).await, Ok(true)) {
            let error = CopierError::file_not_found(format!("source disappeared before copy: {}", source.display()));
            let info = self.classifier.classify(&error, "copy", Some(&source));
            {
                let mut item = handle.lock();
                for (name, _) in &pending {
                    item.mark_destination_failed(name, info.category, error.to_string());
                }
            }
            self.finalize_failed(handle).await;
            return;
        }

        let targets: Vec<PathBuf> = pending.iter().map(|(_, path)| path.clone()).collect();
        let progress = self.progress_callback(handle, pending.iter().map(|(name, _)| name.clone()).collect());

        let copy_outcome = self
            .retry
            .execute_file_operation(|| {
                self.copier
                    .copy(&source, &targets, operation_id, &item_cancel, Some(Arc::clone(&progress)))
            })
            .await;

        let outcome = match copy_outcome.result {
            Some(outcome) => outcome,
            None => {
                let error = copy_outcome
                    .final_error
                    .unwrap_or_else(|| CopierError::internal_error("copy failed without an error"));
                self.handle_copy_failure(handle, &pending, error, &stalled).await;
                return;
            }
        };

        self.metrics
            .copy_duration_seconds
            .observe(outcome.duration.as_secs_f64());
        self.metrics
            .bytes_copied_total
            .inc_by(outcome.bytes_copied * pending.len() as u64);
        self.maybe_performance_alert(operation_id, &source, &outcome.average_speed, outcome.bytes_copied);

        // Verification: digest the source once, verify each destination
        // under the Verification policy
        let source_digest = if self.verifier.uses_hash(outcome.bytes_copied) {
            self.retry
                .execute_verification_operation(|| self.verifier.digest_source(&source))
                .await
                .result
        } else {
            None
        };

        // Every destination is verified even after one fails, so the item's
        // destination states are complete before a recovery decision is made
        let mut last_verification_failure: Option<ErrorInfo> = None;
        for (name, target) in &pending {
            handle.lock().mark_destination_verifying(name);
            let verification = self
                .retry
                .execute_verification_operation(|| async {
                    let outcome = self
                        .verifier
                        .verify_target(&source, target, source_digest.as_deref())
                        .await;
                    if outcome.success {
                        Ok(outcome)
                    } else {
                        Err(outcome
                            .error
                            .clone()
                            .unwrap_or_else(|| CopierError::VerificationError("verification failed".into())))
                    }
                })
                .await;

            match verification.result {
                Some(result) => {
                    if result.used_fallback {
                        debug!(target = %target.display(), "verification used sized fallback");
                    }
                    handle.lock().mark_destination_completed(name, outcome.bytes_copied);
                }
                None => {
                    let error = verification
                        .final_error
                        .unwrap_or_else(|| CopierError::VerificationError("verification failed".into()));
                    let info = self.classifier.classify(&error, "verify", Some(&source));
                    handle.lock().mark_destination_failed(name, info.category, error.to_string());
                    self.metrics.verification_failures_total.inc();
                    self.audit.record(
                        AuditEvent::new(AuditEventType::VerificationFailed, error.to_string())
                            .with_operation(operation_id)
                            .with_path(target)
                            .with_property("destination", name.clone()),
                    );
                    last_verification_failure = Some(info);
                }
            }
        }

        if let Some(info) = last_verification_failure {
            self.conclude_with_strategy(handle, info).await;
            return;
        }

        let state = {
            let mut item = handle.lock();
            item.recompute_state();
            item.state()
        };
        match state {
            ItemState::Completed => self.finish_completed(handle).await,
            ItemState::Failed => self.maybe_retry(handle).await,
            other => {
                warn!(operation_id = %operation_id, state = ?other, "item ended execution in a non-terminal state");
                self.finalize_failed(handle).await;
            }
        }
    }

    async fn handle_copy_failure(
        self: &Arc<Self>,
        handle: &ItemHandle,
        pending: &[(String, PathBuf)],
        error: CopierError,
        stalled: &AtomicBool,
    ) {
        let source = handle.lock().source_path().clone();

        // A cancellation caused by the stall sweeper is a stall, not a
        // shutdown
        let error = match error {
            CopierError::Cancelled(msg) if stalled.load(Ordering::SeqCst) => {
                CopierError::Stalled(format!("no progress within operation timeout: {}", msg))
            }
            other => other,
        };

        let shutdown_cancel = matches!(error, CopierError::Cancelled(_));
        let source_gone = matches!(error, CopierError::FileNotFound(_))
            && !matches!(tokio::fs::try_exists(&source).await, Ok(true));

        let info = self.classifier.classify(&error, "copy", Some(&source));
        {
            let mut item = handle.lock();
            for (name, _) in pending {
                item.mark_destination_failed(name, info.category, error.to_string());
            }
        }

        if shutdown_cancel || source_gone {
            self.finalize_failed(handle).await;
            return;
        }
        // Stalls take the same strategy dispatch as every other failure, so
        // a chronically stalling item can still escalate or quarantine once
        // its classification history crosses the threshold
        self.conclude_with_strategy(handle, info).await;
    }

    /// Applies the classifier's recovery strategy to a failed item.
    async fn conclude_with_strategy(self: &Arc<Self>, handle: &ItemHandle, mut info: ErrorInfo) {
        let source = handle.lock().source_path().clone();
        match info.strategy {
            RecoveryStrategy::Quarantine => {
                info.file_path = Some(source);
                self.recovery.apply(&info).await;
                self.metrics.files_quarantined_total.inc();
                self.finalize_failed(handle).await;
            }
            RecoveryStrategy::Escalate => {
                self.recovery.apply(&info).await;
                self.metrics.errors_escalated_total.inc();
                self.finalize_failed(handle).await;
            }
            RecoveryStrategy::Abort => {
                self.finalize_failed(handle).await;
            }
            RecoveryStrategy::ImmediateRetry | RecoveryStrategy::DelayedRetry => {
                self.maybe_retry(handle).await;
            }
        }
    }

    /// Schedules an item-level retry when budget remains, otherwise fails
    /// the item terminally.
    async fn maybe_retry(self: &Arc<Self>, handle: &ItemHandle) {
        let (operation_id, retry_count) = {
            let item = handle.lock();
            (item.operation_id(), item.retry_count())
        };
        if self.stopped.load(Ordering::SeqCst) || retry_count >= self.config.max_retries {
            self.finalize_failed(handle).await;
            return;
        }

        handle.lock().prepare_retry();
        self.items_retried.fetch_add(1, Ordering::Relaxed);
        self.metrics.items_retried_total.inc();
        info!(
            operation_id = %operation_id,
            attempt = retry_count + 2,
            delay = ?self.config.retry_delay,
            "scheduling item retry for failed destinations"
        );

        let queue = Arc::clone(self);
        let retry_handle = Arc::clone(handle);
        let delay = self.config.retry_delay;
        let cancel = self.cancel.lock().clone();
        tokio::spawn(async move {
            if let Some(cancel) = cancel {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return,
                }
            } else {
                tokio::time::sleep(delay).await;
            }
            if queue.stopped.load(Ordering::SeqCst) {
                return;
            }
            queue.work.push(WorkEntry::Retry(retry_handle));
            queue.work_notify.notify_one();
        });
    }

    async fn finish_completed(&self, handle: &ItemHandle) {
        let snapshot = handle.lock().clone();
        self.active.lock().remove(&snapshot.operation_id());
        self.items_completed.fetch_add(1, Ordering::Relaxed);
        self.metrics.items_completed_total.inc();
        self.push_outcome(true);

        let bytes: u64 = snapshot.destinations().values().map(|d| d.bytes_copied()).sum();
        info!(
            operation_id = %snapshot.operation_id(),
            source = %snapshot.source_path().display(),
            destinations = snapshot.destinations().len(),
            bytes,
            "item completed"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::FileCopyCompleted, "replication completed")
                .with_operation(snapshot.operation_id())
                .with_path(snapshot.source_path())
                .with_property("destinations", snapshot.destinations().len().to_string())
                .with_property("bytes", bytes.to_string())
                .with_property("retries", snapshot.retry_count().to_string()),
        );
        self.completed.lock().insert(
            snapshot.operation_id(),
            CompletedEntry {
                snapshot,
                finished_at: Utc::now(),
            },
        );
    }

    async fn finalize_failed(&self, handle: &ItemHandle) {
        let snapshot = {
            let mut item = handle.lock();
            item.recompute_state();
            item.mark_failed();
            item.clone()
        };
        self.active.lock().remove(&snapshot.operation_id());
        self.items_failed.fetch_add(1, Ordering::Relaxed);
        self.metrics.items_failed_total.inc();
        self.push_outcome(false);

        let last_error = snapshot
            .error_history()
            .back()
            .map(|record| record.message.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        warn!(
            operation_id = %snapshot.operation_id(),
            source = %snapshot.source_path().display(),
            retries = snapshot.retry_count(),
            error = %last_error,
            "item failed"
        );
        self.audit.record(
            AuditEvent::new(AuditEventType::FileCopyFailed, last_error)
                .with_operation(snapshot.operation_id())
                .with_path(snapshot.source_path())
                .with_property("retries", snapshot.retry_count().to_string()),
        );
        self.completed.lock().insert(
            snapshot.operation_id(),
            CompletedEntry {
                snapshot,
                finished_at: Utc::now(),
            },
        );
    }

    fn progress_callback(&self, handle: &ItemHandle, names: Vec<String>) -> ProgressCallback {
        let handle = Arc::clone(handle);
        Arc::new(move |update| {
            let mut item = handle.lock();
            for name in &names {
                item.record_destination_progress(name, update.bytes_copied, update.percent);
            }
        })
    }

    fn maybe_performance_alert(&self, operation_id: OperationId, source: &std::path::Path, speed: &f64, bytes: u64) {
        if self.config.performance_alert_min_bps <= 0.0 || bytes == 0 {
            return;
        }
        if *speed < self.config.performance_alert_min_bps {
            self.audit.record(
                AuditEvent::new(
                    AuditEventType::PerformanceAlert,
                    format!("copy speed {:.0} B/s below configured floor", speed),
                )
                .with_operation(operation_id)
                .with_path(source)
                .with_property("bytes", bytes.to_string()),
            );
        }
    }

    fn push_outcome(&self, success: bool) {
        let mut outcomes = self.recent_outcomes.lock();
        if outcomes.len() == RECENT_OUTCOME_WINDOW {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
    }

    async fn maintenance_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.processing_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_maintenance_once(),
                _ = cancel.cancelled() => break,
            }
        }
        debug!("maintenance task exited");
    }

    /// One maintenance sweep: stall detection, completed-item retention,
    /// gauge refresh, classifier history pruning.
    fn run_maintenance_once(&self) {
        let now = Utc::now();

        // Stalled items: cancel the in-flight operation; the worker observes
        // the cancellation and routes it through the classifier's recovery
        // strategy like any other failure
        for (operation_id, entry) in self.active.lock().iter() {
            let item = entry.item.lock();
            if item.state() != ItemState::Processing {
                continue;
            }
            let idle = now
                .signed_duration_since(item.last_activity())
                .to_std()
                .unwrap_or_default();
            if idle >= self.config.operation_timeout {
                warn!(operation_id = %operation_id, ?idle, "item stalled, cancelling in-flight operation");
                entry.stalled.store(true, Ordering::SeqCst);
                entry.cancel.cancel();
            }
        }

        // Retention: drop old completed entries, then enforce the size cap
        // evicting oldest-first
        {
            let mut completed = self.completed.lock();
            let retention = chrono::Duration::from_std(self.config.completed_item_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
            completed.retain(|_, entry| now.signed_duration_since(entry.finished_at) <= retention);
            while completed.len() > self.config.max_completed_items {
                let oldest = completed
                    .iter()
                    .min_by_key(|(_, entry)| entry.finished_at)
                    .map(|(id, _)| *id);
                match oldest {
                    Some(id) => {
                        completed.remove(&id);
                    }
                    None => break,
                }
            }
        }

        self.metrics.active_operations.set(self.active.lock().len() as i64);
        self.metrics.queue_depth.set(self.work.len() as i64);
        self.metrics.circuit_breaker_trips.set(self.retry.circuit_trips() as i64);

        let swept = self.classifier.sweep_history();
        if swept > 0 {
            debug!(swept, "classifier history entries expired");
        }
    }
}
