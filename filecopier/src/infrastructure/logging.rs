// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging and Audit Sink
//!
//! Two distinct output channels with different guarantees:
//!
//! - **Diagnostic logging** via `tracing` - human-oriented, level-filtered,
//!   to stdout or a log file. Loss is acceptable.
//! - **Audit trail** via [`AuditLog`] - machine-oriented JSON lines, one
//!   file per day in the audit directory, flushed per event. This is the
//!   auditable record of every file the service touched; loss is not
//!   acceptable, so every record is written and flushed synchronously under
//!   a short lock.

use chrono::{NaiveDate, Utc};
use filecopier_domain::events::audit_event::AuditEvent;
use filecopier_domain::CopierError;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// `level` is a tracing filter directive (plain level like `info` or a full
/// `EnvFilter` expression); `RUST_LOG` overrides it when set. With a file
/// path, output goes to the file with ANSI colours disabled.
pub fn init(level: &str, file_path: Option<&Path>) -> Result<(), CopierError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CopierError::invalid_config(format!("invalid log level '{}': {}", level, e)))?;

    match file_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CopierError::invalid_config(format!("cannot create log directory: {}", e)))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| CopierError::invalid_config(format!("cannot open log file {}: {}", path.display(), e)))?;
            let file = Arc::new(file);
            let make_writer = move || SharedFileWriter(Arc::clone(&file));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(make_writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| CopierError::internal_error(format!("logging init failed: {}", e)))?;
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .map_err(|e| CopierError::internal_error(format!("logging init failed: {}", e)))?;
        }
    }
    Ok(())
}

/// `Write` adapter over a shared log file handle.
struct SharedFileWriter(Arc<File>);

impl Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&*self.0).flush()
    }
}

/// Append-only JSONL audit sink with daily file rotation.
///
/// File naming: `audit-YYYYMMDD.jsonl` inside the audit directory.
pub struct AuditLog {
    directory: PathBuf,
    writer: Mutex<Option<(NaiveDate, BufWriter<File>)>>,
}

impl AuditLog {
    /// Creates the sink, ensuring the audit directory exists.
    pub fn new(directory: PathBuf) -> Result<Self, CopierError> {
        std::fs::create_dir_all(&directory).map_err(|e| {
            CopierError::invalid_config(format!(
                "cannot create audit directory {}: {}",
                directory.display(),
                e
            ))
        })?;
        Ok(Self {
            directory,
            writer: Mutex::new(None),
        })
    }

    /// Appends one event as a JSON line and flushes it.
    ///
    /// Failures are logged and swallowed: a broken audit disk must not stop
    /// replication, but every failed write leaves a diagnostic trace.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.try_record(&event) {
            error!(event_type = %event.event_type, error = %e, "audit record write failed");
        }
    }

    /// Path the given date's events are appended to
    pub fn file_for_date(&self, date: NaiveDate) -> PathBuf {
        self.directory.join(format!("audit-{}.jsonl", date.format("%Y%m%d")))
    }

    fn try_record(&self, event: &AuditEvent) -> Result<(), CopierError> {
        let line = serde_json::to_string(event)?;
        let today = Utc::now().date_naive();

        let mut guard = self.writer.lock();
        let needs_rotation = match guard.as_ref() {
            Some((date, _)) => *date != today,
            None => true,
        };
        if needs_rotation {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_for_date(today))
                .map_err(CopierError::from)?;
            *guard = Some((today, BufWriter::new(file)));
        }

        // Rotation above guarantees the writer exists
        if let Some((_, writer)) = guard.as_mut() {
            writeln!(writer, "{}", line).map_err(CopierError::from)?;
            writer.flush().map_err(CopierError::from)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filecopier_domain::events::audit_event::AuditEventType;
    use tempfile::TempDir;

    #[test]
    fn test_records_are_appended_as_json_lines() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path().join("audit")).unwrap();

        audit.record(AuditEvent::new(AuditEventType::FileDetected, "saw slide.svs"));
        audit.record(AuditEvent::new(AuditEventType::FileCopyStarted, "copying slide.svs"));

        let path = audit.file_for_date(Utc::now().date_naive());
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, AuditEventType::FileDetected);
        assert_eq!(first.message, "saw slide.svs");
    }

    #[test]
    fn test_audit_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/audit");
        AuditLog::new(nested.clone()).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_dated_file_name() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path().to_path_buf()).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert!(audit.file_for_date(date).ends_with("audit-20250309.jsonl"));
    }
}
