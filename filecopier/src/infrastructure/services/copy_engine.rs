// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Copy Engine
//!
//! Streams one source file to any number of destinations in a single pass:
//! each chunk is read once and written to every target before the next read.
//! Memory stays bounded by the chunk size no matter how large the file is.
//!
//! ## Atomic publish
//!
//! Targets are written under a temporary name (`{final}.copying.{operation
//! id}`) and renamed into place only after the byte stream is complete and
//! fsynced. No observer ever sees a partial file under the final name, and
//! no file ending in the temp suffix survives the operation - success,
//! failure, or cancellation.
//!
//! ## Rollback
//!
//! If any target fails mid-copy the whole multi-target operation fails:
//! temp files are deleted and targets already renamed to their final name
//! are removed again. The visible filesystem state is always "all published"
//! or "none published", which keeps the queue's recovery logic simple.
//!
//! The source is opened with shared read+write access and never locked
//! exclusively; an external writer that still holds the file open is not
//! blocked (its writes would reset the stability clock upstream anyway).

use crate::infrastructure::services::file_access::open_shared_read;
use filecopier_bootstrap::shutdown::CancellationToken;
use filecopier_domain::value_objects::operation_id::OperationId;
use filecopier_domain::{ChunkSize, CopierError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Copy progress snapshot delivered to the progress callback.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub operation_id: OperationId,
    pub bytes_copied: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

/// Progress callback. Invoked at most once per progress interval (bytes or
/// time, whichever fires first) plus once at completion.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Result of a completed multi-target copy.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub operation_id: OperationId,
    pub bytes_copied: u64,
    pub duration: Duration,
    /// Average throughput in bytes per second
    pub average_speed: f64,
}

/// Copy engine configuration, resolved from the `copying` settings section.
#[derive(Debug, Clone)]
pub struct CopyEngineConfig {
    pub chunk_size: ChunkSize,
    pub preserve_timestamps: bool,
    /// Emit a progress update at most every this many bytes
    pub progress_bytes_interval: u64,
    /// ... or at most every this much time, whichever fires first
    pub progress_time_interval: Duration,
}

impl Default for CopyEngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: ChunkSize::default(),
            preserve_timestamps: true,
            progress_bytes_interval: 8 * 1024 * 1024,
            progress_time_interval: Duration::from_millis(500),
        }
    }
}

/// Port the processing queue drives copies through. `CopyEngine` is the
/// production implementation; tests substitute failure-injecting fakes.
#[async_trait::async_trait]
pub trait CopyService: Send + Sync {
    async fn copy(
        &self,
        source: &Path,
        targets: &[PathBuf],
        operation_id: OperationId,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<CopyOutcome, CopierError>;
}

/// Single-source, multi-target streaming copier with atomic publish.
pub struct CopyEngine {
    config: CopyEngineConfig,
}

#[async_trait::async_trait]
impl CopyService for CopyEngine {
    async fn copy(
        &self,
        source: &Path,
        targets: &[PathBuf],
        operation_id: OperationId,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<CopyOutcome, CopierError> {
        self.copy_to_targets(source, targets, operation_id, cancel, progress).await
    }
}

impl CopyEngine {
    pub fn new(config: CopyEngineConfig) -> Self {
        Self { config }
    }

    /// Temp-file name used while a target is being written.
    pub fn temp_path_for(final_path: &Path, operation_id: OperationId) -> PathBuf {
        let mut name = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| std::ffi::OsString::from("target"));
        name.push(format!(".copying.{}", operation_id.as_simple()));
        final_path.with_file_name(name)
    }

    /// Copies `source` to every path in `targets`, publishing each target
    /// atomically. On any failure every temp file and every already-published
    /// target of this operation is removed before the error is returned.
    pub async fn copy_to_targets(
        &self,
        source: &Path,
        targets: &[PathBuf],
        operation_id: OperationId,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<CopyOutcome, CopierError> {
        if targets.is_empty() {
            return Err(CopierError::invalid_config("copy requested with no targets"));
        }

        let started = Instant::now();
        let source_meta = tokio::fs::metadata(source).await.map_err(|e| {
            let base = CopierError::from(e);
            match base {
                CopierError::FileNotFound(msg) => {
                    CopierError::FileNotFound(format!("copy source missing: {} ({})", source.display(), msg))
                }
                other => other,
            }
        })?;
        let total_bytes = source_meta.len();

        let temp_paths: Vec<PathBuf> = targets
            .iter()
            .map(|t| Self::temp_path_for(t, operation_id))
            .collect();

        for target in targets {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(CopierError::from)?;
            }
        }

        match self
            .stream_to_temps(source, targets, &temp_paths, total_bytes, operation_id, cancel, progress)
            .await
        {
            Ok(bytes_copied) => {
                let duration = started.elapsed();
                let average_speed = if duration.as_secs_f64() > 0.0 {
                    bytes_copied as f64 / duration.as_secs_f64()
                } else {
                    0.0
                };
                debug!(
                    operation_id = %operation_id,
                    bytes = bytes_copied,
                    targets = targets.len(),
                    ?duration,
                    "copy published"
                );
                Ok(CopyOutcome {
                    operation_id,
                    bytes_copied,
                    duration,
                    average_speed,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// The full write-publish pipeline. On error the caller sees a clean
    /// filesystem: this method removes its own temp files and rolls back any
    /// target it already renamed.
    #[allow(clippy::too_many_arguments)]
    async fn stream_to_temps(
        &self,
        source: &Path,
        targets: &[PathBuf],
        temp_paths: &[PathBuf],
        total_bytes: u64,
        operation_id: OperationId,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, CopierError> {
        let mut source_file = match open_shared_read(source).await {
            Ok(file) => file,
            Err(e) => {
                remove_all(temp_paths).await;
                return Err(e);
            }
        };

        let mut temp_files = Vec::with_capacity(temp_paths.len());
        for temp in temp_paths {
            match tokio::fs::File::create(temp).await {
                Ok(file) => temp_files.push(file),
                Err(e) => {
                    remove_all(temp_paths).await;
                    return Err(CopierError::from(e));
                }
            }
        }

        let mut buffer = vec![0u8; self.config.chunk_size.bytes()];
        let mut bytes_copied: u64 = 0;
        let mut bytes_since_emit: u64 = 0;
        let mut last_emit = Instant::now();

        loop {
            // Cancellation is honoured at chunk boundaries only; a chunk in
            // flight always lands in full or not at all.
            if cancel.is_cancelled() {
                drop(temp_files);
                remove_all(temp_paths).await;
                return Err(CopierError::cancelled(format!(
                    "copy of {} cancelled after {} bytes",
                    source.display(),
                    bytes_copied
                )));
            }

            let read = match source_file.read(&mut buffer).await {
                Ok(n) => n,
                Err(e) => {
                    drop(temp_files);
                    remove_all(temp_paths).await;
                    return Err(CopierError::from(e));
                }
            };
            if read == 0 {
                break;
            }

            let mut write_error: Option<std::io::Error> = None;
            for file in temp_files.iter_mut() {
                if let Err(e) = file.write_all(&buffer[..read]).await {
                    write_error = Some(e);
                    break;
                }
            }
            if let Some(e) = write_error {
                drop(temp_files);
                remove_all(temp_paths).await;
                return Err(CopierError::from(e));
            }

            bytes_copied += read as u64;
            bytes_since_emit += read as u64;

            if let Some(ref callback) = progress {
                if bytes_since_emit >= self.config.progress_bytes_interval
                    || last_emit.elapsed() >= self.config.progress_time_interval
                {
                    callback(progress_update(operation_id, bytes_copied, total_bytes));
                    bytes_since_emit = 0;
                    last_emit = Instant::now();
                }
            }
        }

        // Flush and fsync before publish; sync failures are logged but do
        // not fail the copy (the rename barrier is the correctness boundary)
        let mut flush_error: Option<std::io::Error> = None;
        for (file, temp) in temp_files.iter_mut().zip(temp_paths) {
            if let Err(e) = file.flush().await {
                flush_error = Some(e);
                break;
            }
            if let Err(e) = file.sync_all().await {
                warn!(path = %temp.display(), error = %e, "fsync failed before publish");
            }
        }
        if let Some(e) = flush_error {
            drop(temp_files);
            remove_all(temp_paths).await;
            return Err(CopierError::from(e));
        }
        // Close every handle before renaming; Windows cannot rename an open
        // file
        drop(temp_files);

        let mut published: Vec<&PathBuf> = Vec::with_capacity(targets.len());
        for (temp, target) in temp_paths.iter().zip(targets) {
            match tokio::fs::rename(temp, target).await {
                Ok(()) => published.push(target),
                Err(e) => {
                    for already in &published {
                        if let Err(cleanup_err) = tokio::fs::remove_file(already).await {
                            warn!(path = %already.display(), error = %cleanup_err, "rollback of published target failed");
                        }
                    }
                    remove_all(temp_paths).await;
                    return Err(CopierError::from(e));
                }
            }
        }

        if self.config.preserve_timestamps {
            for target in targets {
                if let Err(e) = preserve_timestamps(source, target) {
                    // Metadata transfer is best-effort; the bytes are already
                    // published and verified separately
                    warn!(path = %target.display(), error = %e, "failed to preserve timestamps");
                }
            }
        }

        if let Some(ref callback) = progress {
            callback(progress_update(operation_id, bytes_copied, total_bytes));
        }

        Ok(bytes_copied)
    }
}

fn progress_update(operation_id: OperationId, bytes_copied: u64, total_bytes: u64) -> ProgressUpdate {
    let percent = if total_bytes == 0 {
        100.0
    } else {
        (bytes_copied as f64 / total_bytes as f64 * 100.0).min(100.0)
    };
    ProgressUpdate {
        operation_id,
        bytes_copied,
        total_bytes,
        percent,
    }
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "temp file cleanup failed"),
        }
    }
}

/// Copies modification (and, where the platform supports it, creation)
/// times from the source onto a published target. Access times are only
/// transferred on Windows; on Unix mounts with `noatime`/`relatime` they are
/// not meaningful.
fn preserve_timestamps(source: &Path, target: &Path) -> std::io::Result<()> {
    let source_meta = std::fs::metadata(source)?;
    let modified = source_meta.modified()?;

    #[cfg_attr(not(windows), allow(unused_mut))]
    let mut times = std::fs::FileTimes::new().set_modified(modified);

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileTimesExt;
        if let Ok(created) = source_meta.created() {
            times = times.set_created(created);
        }
        if let Ok(accessed) = source_meta.accessed() {
            times = times.set_accessed(accessed);
        }
    }

    let target_file = std::fs::OpenOptions::new().write(true).open(target)?;
    target_file.set_times(times)
}
