// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Chunk Size Value Object
//!
//! Type-safe representation of the read/write buffer size used by the copy
//! engine and the verifier. Replication must bound memory regardless of file
//! size - peak resident memory per operation is O(chunk size), never O(file
//! size) - so the bounds here are the memory contract of the whole service.
//!
//! ## Constraints
//!
//! - **Minimum (4 KiB)**: below one page the syscall overhead dominates and
//!   throughput collapses
//! - **Maximum (64 MiB)**: a whole-slide image is tens of GB; with multiple
//!   concurrent operations each holding one buffer, anything larger risks
//!   real memory pressure on a shared host
//! - **Default (64 KiB)**: matches the source application's write granularity
//!   and keeps per-operation memory negligible

use crate::CopierError;
use serde::{Deserialize, Serialize};

/// Validated copy/hash buffer size in bytes.
///
/// Immutable once constructed; two chunk sizes compare by byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkSize(usize);

impl ChunkSize {
    /// Minimum allowed chunk size: 4 KiB
    pub const MIN_SIZE: usize = 4 * 1024;

    /// Maximum allowed chunk size: 64 MiB
    pub const MAX_SIZE: usize = 64 * 1024 * 1024;

    /// Default chunk size: 64 KiB
    pub const DEFAULT_SIZE: usize = 64 * 1024;

    /// Creates a chunk size, validating it against the allowed bounds.
    ///
    /// # Errors
    ///
    /// Returns `CopierError::InvalidConfiguration` when `bytes` falls outside
    /// `[MIN_SIZE, MAX_SIZE]`.
    pub fn new(bytes: usize) -> Result<Self, CopierError> {
        if bytes < Self::MIN_SIZE {
            return Err(CopierError::invalid_config(format!(
                "chunk size {} is below the minimum of {} bytes",
                bytes,
                Self::MIN_SIZE
            )));
        }
        if bytes > Self::MAX_SIZE {
            return Err(CopierError::invalid_config(format!(
                "chunk size {} exceeds the maximum of {} bytes",
                bytes,
                Self::MAX_SIZE
            )));
        }
        Ok(Self(bytes))
    }

    /// Creates a chunk size from kilobytes
    pub fn from_kb(kb: usize) -> Result<Self, CopierError> {
        Self::new(kb * 1024)
    }

    /// Creates a chunk size from megabytes
    pub fn from_mb(mb: usize) -> Result<Self, CopierError> {
        Self::new(mb * 1024 * 1024)
    }

    /// Size in bytes
    pub fn bytes(&self) -> usize {
        self.0
    }

    /// Number of chunks needed to cover `file_size` bytes
    pub fn chunks_needed_for_file(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.0 as u64)
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(Self::DEFAULT_SIZE)
    }
}

impl std::fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 % (1024 * 1024) == 0 {
            write!(f, "{} MiB", self.0 / (1024 * 1024))
        } else if self.0 % 1024 == 0 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}
