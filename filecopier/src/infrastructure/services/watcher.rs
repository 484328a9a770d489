// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Completion Detector
//!
//! Turns a stream of raw filesystem change events into a stream of "file X
//! is stable and ready to copy" records, under a weak consistency model: the
//! writing application gives no signal when a file is finished, so
//! completion is inferred from quiescence.
//!
//! ## Mechanism
//!
//! Three cooperating tasks:
//!
//! - **Event task** - consumes platform notifications (`notify` recommended
//!   watcher) and inserts matching paths into the pending map. Rename
//!   targets are treated as creates; rename sources and removals are
//!   forgotten.
//! - **Stability poller** - wakes every `stability_check_interval` and stats
//!   each pending file. A changed size or mtime restarts the stable-poll
//!   run; an unchanged observation increments it. Once a file has been
//!   stable for `max_stability_checks` consecutive polls *and* is older
//!   than `minimum_file_age`, a [`DetectionRecord`] is emitted onto the
//!   ready queue.
//! - **Rescan task** (optional) - walks the source tree every
//!   `rescan_interval` and inserts matching files the notifier never
//!   mentioned. Platform notification streams drop events under load; the
//!   rescan guarantees no file is lost, only delayed.
//!
//! Paths already emitted are remembered so rescans do not re-queue files
//! that are merely still sitting in the source directory. A fresh change
//! event for an emitted path re-arms detection from scratch.

use crate::infrastructure::logging::AuditLog;
use crate::infrastructure::metrics::MetricsService;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use filecopier_bootstrap::shutdown::CancellationToken;
use filecopier_domain::events::audit_event::{AuditEvent, AuditEventType};
use filecopier_domain::{CopierError, DetectionRecord};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Detector configuration, resolved from the `monitoring` settings section.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub source_dir: PathBuf,
    pub include_subdirectories: bool,
    pub file_filters: Vec<String>,
    pub exclude_extensions: Vec<String>,
    pub exclude_prefixes: Vec<String>,
    pub minimum_file_age: Duration,
    pub stability_check_interval: Duration,
    pub max_stability_checks: u32,
    pub rescan_interval: Option<Duration>,
}

/// Thread-safe FIFO of ready files between the detector and the queue.
pub struct ReadyQueue {
    queue: SegQueue<DetectionRecord>,
    notify: Notify,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, record: DetectionRecord) {
        self.queue.push(record);
        self.notify.notify_one();
    }

    /// Non-blocking dequeue
    pub fn try_dequeue(&self) -> Option<DetectionRecord> {
        self.queue.pop()
    }

    /// Waits for a record or cancellation.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<DetectionRecord> {
        loop {
            if let Some(record) = self.queue.pop() {
                return Some(record);
            }
            if cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Detector status snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectorStatus {
    pub queue_count: usize,
    pub pending_count: usize,
    pub is_running: bool,
    pub files_detected: u64,
    pub files_queued: u64,
    pub files_skipped: u64,
    pub watcher_errors: u64,
    pub events_coalesced: u64,
}

#[derive(Debug, Clone)]
struct PendingFile {
    first_seen: DateTime<Utc>,
    last_size: u64,
    last_mtime: SystemTime,
    stable_checks: u32,
}

enum WatchSignal {
    Event(notify::Event),
    Error(String),
}

/// Include/exclude filter over file names.
struct FileFilter {
    includes: GlobSet,
    include_count: usize,
    exclude_extensions: Vec<String>,
    exclude_prefixes: Vec<String>,
}

impl FileFilter {
    fn build(config: &WatcherConfig) -> Result<Self, CopierError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.file_filters {
            let glob = Glob::new(pattern)
                .map_err(|e| CopierError::invalid_config(format!("invalid file filter '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        let includes = builder
            .build()
            .map_err(|e| CopierError::invalid_config(format!("cannot build file filters: {}", e)))?;
        Ok(Self {
            includes,
            include_count: config.file_filters.len(),
            exclude_extensions: config
                .exclude_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
            exclude_prefixes: config.exclude_prefixes.clone(),
        })
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return false;
        };
        if self.exclude_prefixes.iter().any(|p| !p.is_empty() && name.starts_with(p)) {
            return false;
        }
        if let Some(ext) = path.extension() {
            let ext = normalize_extension(&ext.to_string_lossy());
            if self.exclude_extensions.contains(&ext) {
                return false;
            }
        }
        // An empty include list accepts everything
        if self.include_count == 0 {
            return true;
        }
        self.includes.is_match(Path::new(&name))
    }
}

fn normalize_extension(ext: &str) -> String {
    let lowered = ext.to_lowercase();
    lowered.strip_prefix('.').map(str::to_string).unwrap_or(lowered)
}

/// Watches the source directory and emits stable-file records.
pub struct CompletionDetector {
    config: WatcherConfig,
    filter: FileFilter,
    pending: Mutex<HashMap<PathBuf, PendingFile>>,
    emitted: Mutex<HashSet<PathBuf>>,
    ready: Arc<ReadyQueue>,
    metrics: Arc<MetricsService>,
    audit: Arc<AuditLog>,
    running: AtomicBool,
    files_detected: AtomicU64,
    files_queued: AtomicU64,
    files_skipped: AtomicU64,
    watcher_errors: AtomicU64,
    events_coalesced: AtomicU64,
    watcher: Mutex<Option<RecommendedWatcher>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CompletionDetector {
    pub fn new(
        config: WatcherConfig,
        metrics: Arc<MetricsService>,
        audit: Arc<AuditLog>,
    ) -> Result<Self, CopierError> {
        let filter = FileFilter::build(&config)?;
        Ok(Self {
            config,
            filter,
            pending: Mutex::new(HashMap::new()),
            emitted: Mutex::new(HashSet::new()),
            ready: Arc::new(ReadyQueue::new()),
            metrics,
            audit,
            running: AtomicBool::new(false),
            files_detected: AtomicU64::new(0),
            files_queued: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            watcher_errors: AtomicU64::new(0),
            events_coalesced: AtomicU64::new(0),
            watcher: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The queue ready files are emitted onto
    pub fn ready_queue(&self) -> Arc<ReadyQueue> {
        Arc::clone(&self.ready)
    }

    /// Starts the notification, stability-poll, and rescan tasks.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<(), CopierError> {
        if !self.config.source_dir.is_dir() {
            return Err(CopierError::invalid_config(format!(
                "source directory does not exist: {}",
                self.config.source_dir.display()
            )));
        }

        let (event_tx, rx) = mpsc::unbounded_channel::<WatchSignal>();
        let mut watcher = notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
            let signal = match result {
                Ok(event) => WatchSignal::Event(event),
                Err(e) => WatchSignal::Error(e.to_string()),
            };
            let _ = event_tx.send(signal);
        })
        .map_err(|e| CopierError::io_error(format!("cannot create filesystem watcher: {}", e)))?;

        let mode = if self.config.include_subdirectories {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&self.config.source_dir, mode)
            .map_err(|e| CopierError::io_error(format!("cannot watch {}: {}", self.config.source_dir.display(), e)))?;
        *self.watcher.lock() = Some(watcher);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Self::event_task(Arc::clone(self), rx, cancel.clone())));
        tasks.push(tokio::spawn(Self::poll_task(Arc::clone(self), cancel.clone())));
        if self.config.rescan_interval.is_some() {
            tasks.push(tokio::spawn(Self::rescan_task(Arc::clone(self), cancel)));
        }
        drop(tasks);

        self.running.store(true, Ordering::SeqCst);
        info!(
            source = %self.config.source_dir.display(),
            recursive = self.config.include_subdirectories,
            "completion detector started"
        );
        Ok(())
    }

    /// Stops the detector: drops the platform watcher and waits for the
    /// tasks, which exit via the cancellation token.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.watcher.lock() = None;
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "detector task ended abnormally");
                }
            }
        }
        info!("completion detector stopped");
    }

    /// Status snapshot for health reporting.
    pub fn status(&self) -> DetectorStatus {
        DetectorStatus {
            queue_count: self.ready.len(),
            pending_count: self.pending.lock().len(),
            is_running: self.running.load(Ordering::SeqCst),
            files_detected: self.files_detected.load(Ordering::Relaxed),
            files_queued: self.files_queued.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            watcher_errors: self.watcher_errors.load(Ordering::Relaxed),
            events_coalesced: self.events_coalesced.load(Ordering::Relaxed),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn event_task(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<WatchSignal>, cancel: CancellationToken) {
        loop {
            let signal = tokio::select! {
                signal = rx.recv() => signal,
                _ = cancel.cancelled() => break,
            };
            match signal {
                Some(WatchSignal::Event(event)) => self.handle_event(event).await,
                Some(WatchSignal::Error(message)) => {
                    self.watcher_errors.fetch_add(1, Ordering::Relaxed);
                    self.metrics.watcher_errors_total.inc();
                    warn!(error = %message, "filesystem watcher error");
                }
                None => break,
            }
        }
        debug!("event task exited");
    }

    async fn handle_event(&self, event: notify::Event) {
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.consider_path(path).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.forget_path(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.consider_path(path).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // paths = [old, new]; the old name is forgotten and the new
                // name is treated as a create
                if let Some(old) = event.paths.first() {
                    self.forget_path(old);
                }
                if let Some(new) = event.paths.get(1) {
                    self.consider_path(new).await;
                }
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.consider_path(path).await;
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.forget_path(path);
                }
            }
            _ => {}
        }
    }

    /// Inserts a matching file into the pending map, or coalesces the event
    /// when the path is already pending.
    async fn consider_path(&self, path: &Path) {
        if !self.filter.matches(path) {
            return;
        }
        let metadata = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return,
        };
        let size = metadata.len();
        let mtime = metadata.modified().unwrap_or_else(|_| SystemTime::now());

        // A change to a previously emitted path re-arms detection
        self.emitted.lock().remove(path);

        let mut pending = self.pending.lock();
        match pending.get(path) {
            Some(_) => {
                self.events_coalesced.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                pending.insert(
                    path.to_path_buf(),
                    PendingFile {
                        first_seen: Utc::now(),
                        last_size: size,
                        last_mtime: mtime,
                        stable_checks: 0,
                    },
                );
                drop(pending);
                self.files_detected.fetch_add(1, Ordering::Relaxed);
                self.metrics.files_detected_total.inc();
                debug!(path = %path.display(), size, "file entered stability tracking");
            }
        }
    }

    fn forget_path(&self, path: &Path) {
        if self.pending.lock().remove(path).is_some() {
            debug!(path = %path.display(), "pending file forgotten");
        }
        self.emitted.lock().remove(path);
    }

    async fn poll_task(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.stability_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_pending().await,
                _ = cancel.cancelled() => break,
            }
        }
        debug!("stability poll task exited");
    }

    /// One stability sweep over the pending map.
    async fn poll_pending(&self) {
        let paths: Vec<PathBuf> = self.pending.lock().keys().cloned().collect();
        for path in paths {
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(_) => {
                    // Vanished before it ever stabilized
                    if self.pending.lock().remove(&path).is_some() {
                        self.files_skipped.fetch_add(1, Ordering::Relaxed);
                        self.metrics.files_skipped_total.inc();
                        debug!(path = %path.display(), "pending file vanished");
                    }
                    continue;
                }
            };
            let size = metadata.len();
            let mtime = metadata.modified().unwrap_or_else(|_| SystemTime::now());

            let ready_record = {
                let mut pending = self.pending.lock();
                let Some(entry) = pending.get_mut(&path) else {
                    continue;
                };
                if size != entry.last_size || mtime != entry.last_mtime {
                    entry.last_size = size;
                    entry.last_mtime = mtime;
                    entry.stable_checks = 1;
                    None
                } else {
                    entry.stable_checks += 1;
                    let old_enough = Utc::now()
                        .signed_duration_since(entry.first_seen)
                        .to_std()
                        .map(|age| age >= self.config.minimum_file_age)
                        .unwrap_or(false);
                    if entry.stable_checks >= self.config.max_stability_checks && old_enough {
                        let record = DetectionRecord::new(
                            path.clone(),
                            entry.first_seen,
                            size,
                            mtime,
                            entry.stable_checks,
                        );
                        pending.remove(&path);
                        Some(record)
                    } else {
                        None
                    }
                }
            };

            if let Some(record) = ready_record {
                self.emitted.lock().insert(path.clone());
                self.files_queued.fetch_add(1, Ordering::Relaxed);
                self.metrics.files_queued_total.inc();
                info!(path = %path.display(), size, checks = record.stable_checks(), "file stable, queued for replication");
                self.audit.record(
                    AuditEvent::new(AuditEventType::FileDetected, "file stable and queued")
                        .with_path(&path)
                        .with_property("size", size.to_string())
                        .with_property("stable_checks", record.stable_checks().to_string()),
                );
                self.ready.enqueue(record);
            }
        }
    }

    async fn rescan_task(self: Arc<Self>, cancel: CancellationToken) {
        let Some(interval) = self.config.rescan_interval else {
            return;
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup does not race
        // the initial notification burst
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.rescan().await,
                _ = cancel.cancelled() => break,
            }
        }
        debug!("rescan task exited");
    }

    /// Full sweep of the source tree: any matching file the notifier never
    /// delivered is inserted as if a create event had just arrived.
    async fn rescan(&self) {
        let files = self
            .collect_files(&self.config.source_dir, self.config.include_subdirectories)
            .await;
        let mut inserted = 0usize;
        for path in files {
            if !self.filter.matches(&path) {
                continue;
            }
            if self.emitted.lock().contains(&path) || self.pending.lock().contains_key(&path) {
                continue;
            }
            self.consider_path(&path).await;
            inserted += 1;
        }
        if inserted > 0 {
            info!(count = inserted, "rescan found files missed by notifications");
        }
    }

    async fn collect_files(&self, root: &Path, recursive: bool) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    self.watcher_errors.fetch_add(1, Ordering::Relaxed);
                    self.metrics.watcher_errors_total.inc();
                    warn!(dir = %dir.display(), error = %e, "rescan cannot read directory");
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                match entry.file_type().await {
                    Ok(ft) if ft.is_dir() => {
                        if recursive {
                            stack.push(path);
                        }
                    }
                    Ok(ft) if ft.is_file() => files.push(path),
                    _ => {}
                }
            }
        }
        files
    }
}
