// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Verification Types
//!
//! Method selection and outcome records for integrity verification. The
//! verifier itself (streaming SHA-256 over shared-access file handles) is an
//! infrastructure concern; this module owns the vocabulary it speaks.

use crate::CopierError;
use serde::{Deserialize, Serialize};

/// SHA-256 of the empty input, lowercase hex.
///
/// Zero-byte files hash to this constant, which is why verification of an
/// empty pair always succeeds under the `Hash` method.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// How a source/target pair is proven equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMethod {
    /// Streaming SHA-256 of both files, compared as lowercase hex
    Hash,
    /// Byte length equal and modification times within tolerance
    SizeAndTimestamp,
    /// Byte length equal
    SizeOnly,
    /// `Hash` below the large-file threshold, `SizeAndTimestamp` above it
    /// unless large-file hashing is explicitly enabled
    Auto,
}

impl std::fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VerificationMethod::Hash => "Hash",
            VerificationMethod::SizeAndTimestamp => "SizeAndTimestamp",
            VerificationMethod::SizeOnly => "SizeOnly",
            VerificationMethod::Auto => "Auto",
        };
        f.write_str(label)
    }
}

/// Result of verifying one source/target pair.
///
/// `method` records the method that actually ran, which differs from the
/// configured one when `Auto` resolved or a hashing failure degraded to the
/// sized fallback (`used_fallback` is set in that case).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    pub method: VerificationMethod,
    pub source_hash: Option<String>,
    pub target_hash: Option<String>,
    pub used_fallback: bool,
    pub error: Option<CopierError>,
}

impl VerificationOutcome {
    /// Successful outcome for a method that produced no digests
    pub fn success(method: VerificationMethod) -> Self {
        Self {
            success: true,
            method,
            source_hash: None,
            target_hash: None,
            used_fallback: false,
            error: None,
        }
    }

    /// Successful hash comparison carrying both digests
    pub fn hash_match(source_hash: String, target_hash: String) -> Self {
        Self {
            success: true,
            method: VerificationMethod::Hash,
            source_hash: Some(source_hash),
            target_hash: Some(target_hash),
            used_fallback: false,
            error: None,
        }
    }

    /// Failed outcome with the originating error
    pub fn failure(method: VerificationMethod, error: CopierError) -> Self {
        Self {
            success: false,
            method,
            source_hash: None,
            target_hash: None,
            used_fallback: false,
            error: Some(error),
        }
    }

    /// Marks the outcome as produced by the sized fallback
    pub fn with_fallback(mut self) -> Self {
        self.used_fallback = true;
        self
    }
}
