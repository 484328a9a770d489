// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Shared File Access
//!
//! Opens source files for reading without blocking the application that is
//! still allowed to write them. The service must never hold an exclusive
//! lock on a source file: the writing application on the shared host opens
//! its slides with read+write sharing, and a reader that demands exclusivity
//! would make it fail.
//!
//! On Unix this is the default open semantics. On Windows the share mode
//! must be stated explicitly, or the open itself becomes the exclusive lock.

use filecopier_domain::CopierError;
use std::path::Path;

/// Opens `path` for reading with shared read+write access, so an external
/// writer holding the file open remains unblocked.
pub async fn open_shared_read(path: &Path) -> Result<tokio::fs::File, CopierError> {
    let path = path.to_path_buf();
    let std_file = tokio::task::spawn_blocking(move || open_shared_read_std(&path))
        .await
        .map_err(|e| CopierError::internal_error(format!("open task panicked: {}", e)))??;
    Ok(tokio::fs::File::from_std(std_file))
}

#[cfg(windows)]
fn open_shared_read_std(path: &Path) -> Result<std::fs::File, CopierError> {
    use std::os::windows::fs::OpenOptionsExt;

    // FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE
    const SHARE_ALL: u32 = 0x1 | 0x2 | 0x4;

    std::fs::OpenOptions::new()
        .read(true)
        .share_mode(SHARE_ALL)
        .open(path)
        .map_err(|e| annotate_open_error(path, e))
}

#[cfg(not(windows))]
fn open_shared_read_std(path: &Path) -> Result<std::fs::File, CopierError> {
    std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| annotate_open_error(path, e))
}

fn annotate_open_error(path: &Path, e: std::io::Error) -> CopierError {
    let base = CopierError::from(e);
    match base {
        CopierError::FileNotFound(msg) => CopierError::FileNotFound(format!("{}: {}", path.display(), msg)),
        CopierError::PermissionDenied(msg) => CopierError::PermissionDenied(format!("{}: {}", path.display(), msg)),
        CopierError::IoError(msg) => CopierError::IoError(format!("{}: {}", path.display(), msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_open_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        assert!(open_shared_read(file.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_reports_path() {
        let err = open_shared_read(Path::new("/nonexistent/slide.svs")).await.unwrap_err();
        match err {
            CopierError::FileNotFound(msg) => assert!(msg.contains("slide.svs")),
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reader_does_not_block_writer() {
        use std::io::Seek;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"initial").unwrap();

        let _reader = open_shared_read(file.path()).await.unwrap();

        // The original writer handle can still extend the file
        file.as_file_mut().seek(std::io::SeekFrom::End(0)).unwrap();
        file.write_all(b" more").unwrap();
        file.flush().unwrap();
    }
}
