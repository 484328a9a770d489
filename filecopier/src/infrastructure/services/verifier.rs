// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Verifier
//!
//! Proves that a replicated target equals its source. The primary method is
//! a streaming SHA-256 of both files - incremental hashing over a bounded
//! buffer, so memory stays O(chunk size) for a file of any size - with sized
//! fallbacks for configurations that opt out of hashing very large files.
//!
//! ## Methods
//!
//! - **Hash** - SHA-256 of both files compared as lowercase hex. I/O errors
//!   during hashing are retried a configurable number of times with a short
//!   delay; if hashing still fails and the fallback is permitted, the call
//!   degrades to `SizeAndTimestamp` and flags `used_fallback`.
//! - **SizeAndTimestamp** - byte lengths equal and modification times within
//!   a tolerance (default 2 s, absorbing filesystem mtime rounding).
//! - **SizeOnly** - byte lengths equal.
//! - **Auto** - `Hash` for files up to the large-file threshold, then
//!   `SizeAndTimestamp` unless large-file hashing is explicitly enabled.
//!
//! Multi-target verification shares the source digest: it is computed at
//! most once per invocation no matter how many targets are checked.
//!
//! Both files are opened with shared read+write access so an external
//! writer stays unblocked. Missing source or target fails immediately with
//! no retries - absence is not an I/O hiccup.

use crate::infrastructure::services::file_access::open_shared_read;
use filecopier_domain::value_objects::verification::{VerificationMethod, VerificationOutcome};
use filecopier_domain::{ChunkSize, CopierError};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Verifier configuration, resolved from the `verification` settings
/// section.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Configured method; `Auto` resolves per file size
    pub method: VerificationMethod,
    /// Read buffer for hashing
    pub buffer_size: ChunkSize,
    /// Size above which `Auto` stops hashing, in bytes
    pub large_file_threshold: u64,
    /// Hash above the threshold anyway
    pub enable_large_file_hashing: bool,
    /// Allowed mtime difference for `SizeAndTimestamp`
    pub timestamp_tolerance: Duration,
    /// I/O retry attempts per hashed file
    pub hash_retry_attempts: u32,
    /// Delay between hash retries
    pub hash_retry_delay: Duration,
    /// Degrade to `SizeAndTimestamp` when hashing keeps failing
    pub fallback_to_size_timestamp: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            method: VerificationMethod::Hash,
            buffer_size: ChunkSize::default(),
            large_file_threshold: 1024 * 1024 * 1024,
            enable_large_file_hashing: false,
            timestamp_tolerance: Duration::from_secs(2),
            hash_retry_attempts: 3,
            hash_retry_delay: Duration::from_millis(500),
            fallback_to_size_timestamp: true,
        }
    }
}

/// Port the processing queue drives verification through. `FileVerifier` is
/// the production implementation; tests substitute outcome-scripting fakes.
#[async_trait::async_trait]
pub trait VerificationService: Send + Sync {
    /// Whether the resolved method for a source of this size computes a
    /// digest (callers pre-compute and share it across targets)
    fn uses_hash(&self, source_size: u64) -> bool;

    /// Source digest with the configured retry budget
    async fn digest_source(&self, source: &Path) -> Result<String, CopierError>;

    /// Verifies one pair, reusing a pre-computed source digest when given
    async fn verify_target(&self, source: &Path, target: &Path, source_digest: Option<&str>)
        -> VerificationOutcome;
}

/// Streaming integrity verifier.
pub struct FileVerifier {
    config: VerifierConfig,
}

#[async_trait::async_trait]
impl VerificationService for FileVerifier {
    fn uses_hash(&self, source_size: u64) -> bool {
        self.resolve_method(source_size) == VerificationMethod::Hash
    }

    async fn digest_source(&self, source: &Path) -> Result<String, CopierError> {
        self.source_digest(source).await
    }

    async fn verify_target(
        &self,
        source: &Path,
        target: &Path,
        source_digest: Option<&str>,
    ) -> VerificationOutcome {
        self.verify_with_source_digest(source, target, source_digest).await
    }
}

impl FileVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Verifies a single source/target pair.
    pub async fn verify(&self, source: &Path, target: &Path) -> VerificationOutcome {
        self.verify_with_source_digest(source, target, None).await
    }

    /// Verifies one source against many targets, computing the source digest
    /// at most once. Overall success is the conjunction of the per-target
    /// outcomes.
    pub async fn verify_many(&self, source: &Path, targets: &[&Path]) -> Vec<VerificationOutcome> {
        let mut source_digest: Option<String> = None;
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = self
                .verify_with_source_digest(source, target, source_digest.as_deref())
                .await;
            if source_digest.is_none() {
                source_digest = outcome.source_hash.clone();
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Computes the source digest with the configured retry budget, for
    /// callers that verify targets individually but still want the digest
    /// shared across them.
    pub async fn source_digest(&self, source: &Path) -> Result<String, CopierError> {
        self.hash_file(source).await
    }

    /// Verifies a pair, reusing `source_digest` when the caller already has
    /// it.
    pub async fn verify_with_source_digest(
        &self,
        source: &Path,
        target: &Path,
        source_digest: Option<&str>,
    ) -> VerificationOutcome {
        // Absence is terminal: no retries inside the verifier.
        let source_meta = match tokio::fs::metadata(source).await {
            Ok(meta) => meta,
            Err(_) => {
                return VerificationOutcome::failure(
                    self.config.method,
                    CopierError::file_not_found(format!("verification source missing: {}", source.display())),
                );
            }
        };
        let target_meta = match tokio::fs::metadata(target).await {
            Ok(meta) => meta,
            Err(_) => {
                return VerificationOutcome::failure(
                    self.config.method,
                    CopierError::file_not_found(format!("verification target missing: {}", target.display())),
                );
            }
        };

        let method = self.resolve_method(source_meta.len());
        match method {
            VerificationMethod::SizeOnly => self.check_sizes(&source_meta, &target_meta, VerificationMethod::SizeOnly),
            VerificationMethod::SizeAndTimestamp => self.check_size_and_timestamp(&source_meta, &target_meta),
            VerificationMethod::Hash => self.check_hashes(source, target, source_digest).await,
            // resolve_method never returns Auto
            VerificationMethod::Auto => VerificationOutcome::failure(
                VerificationMethod::Auto,
                CopierError::internal_error("Auto method was not resolved"),
            ),
        }
    }

    /// Resolves `Auto` against the source size; other methods pass through.
    fn resolve_method(&self, source_size: u64) -> VerificationMethod {
        match self.config.method {
            VerificationMethod::Auto => {
                if source_size <= self.config.large_file_threshold || self.config.enable_large_file_hashing {
                    VerificationMethod::Hash
                } else {
                    VerificationMethod::SizeAndTimestamp
                }
            }
            other => other,
        }
    }

    fn check_sizes(
        &self,
        source_meta: &std::fs::Metadata,
        target_meta: &std::fs::Metadata,
        method: VerificationMethod,
    ) -> VerificationOutcome {
        if source_meta.len() == target_meta.len() {
            VerificationOutcome::success(method)
        } else {
            VerificationOutcome::failure(
                method,
                CopierError::integrity_error(format!(
                    "size mismatch: source {} bytes, target {} bytes",
                    source_meta.len(),
                    target_meta.len()
                )),
            )
        }
    }

    fn check_size_and_timestamp(
        &self,
        source_meta: &std::fs::Metadata,
        target_meta: &std::fs::Metadata,
    ) -> VerificationOutcome {
        let sized = self.check_sizes(source_meta, target_meta, VerificationMethod::SizeAndTimestamp);
        if !sized.success {
            return sized;
        }
        match (source_meta.modified(), target_meta.modified()) {
            (Ok(source_mtime), Ok(target_mtime)) => {
                let drift = mtime_drift(source_mtime, target_mtime);
                if drift <= self.config.timestamp_tolerance {
                    VerificationOutcome::success(VerificationMethod::SizeAndTimestamp)
                } else {
                    VerificationOutcome::failure(
                        VerificationMethod::SizeAndTimestamp,
                        CopierError::integrity_error(format!(
                            "timestamp drift {:?} exceeds tolerance {:?}",
                            drift, self.config.timestamp_tolerance
                        )),
                    )
                }
            }
            _ => VerificationOutcome::failure(
                VerificationMethod::SizeAndTimestamp,
                CopierError::io_error("modification time unavailable"),
            ),
        }
    }

    async fn check_hashes(
        &self,
        source: &Path,
        target: &Path,
        source_digest: Option<&str>,
    ) -> VerificationOutcome {
        let source_hash = match source_digest {
            Some(digest) => digest.to_string(),
            None => match self.hash_file(source).await {
                Ok(digest) => digest,
                Err(e) => return self.degrade_or_fail(source, target, e).await,
            },
        };
        let target_hash = match self.hash_file(target).await {
            Ok(digest) => digest,
            Err(e) => return self.degrade_or_fail(source, target, e).await,
        };

        if source_hash == target_hash {
            VerificationOutcome::hash_match(source_hash, target_hash)
        } else {
            let error = CopierError::integrity_error(format!(
                "hash mismatch for {}: source {}, target {}",
                target.display(),
                source_hash,
                target_hash
            ));
            VerificationOutcome {
                success: false,
                method: VerificationMethod::Hash,
                source_hash: Some(source_hash),
                target_hash: Some(target_hash),
                used_fallback: false,
                error: Some(error),
            }
        }
    }

    /// Hashing failed past its retry budget: degrade to the sized fallback
    /// when permitted, otherwise surface the hash error.
    async fn degrade_or_fail(&self, source: &Path, target: &Path, error: CopierError) -> VerificationOutcome {
        if !self.config.fallback_to_size_timestamp {
            return VerificationOutcome::failure(VerificationMethod::Hash, error);
        }
        warn!(
            source = %source.display(),
            target = %target.display(),
            error = %error,
            "hashing failed, degrading to size+timestamp verification"
        );
        let source_meta = match tokio::fs::metadata(source).await {
            Ok(meta) => meta,
            Err(e) => return VerificationOutcome::failure(VerificationMethod::Hash, e.into()),
        };
        let target_meta = match tokio::fs::metadata(target).await {
            Ok(meta) => meta,
            Err(e) => return VerificationOutcome::failure(VerificationMethod::Hash, e.into()),
        };
        self.check_size_and_timestamp(&source_meta, &target_meta).with_fallback()
    }

    /// Streaming SHA-256 with the configured retry budget. Each attempt
    /// rereads from the start; a digest must never mix bytes from two
    /// passes.
    async fn hash_file(&self, path: &Path) -> Result<String, CopierError> {
        let attempts = self.config.hash_retry_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.hash_file_once(path).await {
                Ok(digest) => return Ok(digest),
                Err(e @ CopierError::FileNotFound(_)) => return Err(e),
                Err(e) => {
                    debug!(path = %path.display(), attempt, error = %e, "hash attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.hash_retry_delay).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| CopierError::internal_error("hashing failed without an error")))
    }

    async fn hash_file_once(&self, path: &Path) -> Result<String, CopierError> {
        let mut file = open_shared_read(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.config.buffer_size.bytes()];
        loop {
            let read = file.read(&mut buffer).await.map_err(CopierError::from)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn mtime_drift(a: SystemTime, b: SystemTime) -> Duration {
    a.duration_since(b).or_else(|_| b.duration_since(a)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use filecopier_domain::value_objects::verification::EMPTY_SHA256;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        file.sync_all().unwrap();
        path
    }

    fn hash_verifier() -> FileVerifier {
        FileVerifier::new(VerifierConfig {
            hash_retry_delay: Duration::from_millis(1),
            ..VerifierConfig::default()
        })
    }

    #[tokio::test]
    async fn test_identical_files_match_by_hash() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source.svs", b"0123456789abcdef");
        let target = write_file(&dir, "target.svs", b"0123456789abcdef");

        let outcome = hash_verifier().verify(&source, &target).await;
        assert!(outcome.success);
        assert_eq!(outcome.method, VerificationMethod::Hash);
        assert_eq!(outcome.source_hash, outcome.target_hash);
        assert!(!outcome.used_fallback);
    }

    #[tokio::test]
    async fn test_zero_byte_files_hash_to_known_constant() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "empty_src", b"");
        let target = write_file(&dir, "empty_dst", b"");

        let outcome = hash_verifier().verify(&source, &target).await;
        assert!(outcome.success);
        assert_eq!(outcome.source_hash.as_deref(), Some(EMPTY_SHA256));
    }

    #[tokio::test]
    async fn test_one_byte_short_target_fails_under_hash() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source", b"0123456789");
        let target = write_file(&dir, "target", b"012345678");

        let outcome = hash_verifier().verify(&source, &target).await;
        assert!(!outcome.success);
        assert_eq!(outcome.method, VerificationMethod::Hash);
        assert!(outcome.error.as_ref().unwrap().to_string().contains("hash mismatch"));
    }

    #[tokio::test]
    async fn test_missing_target_fails_without_retry() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source", b"data");

        let outcome = hash_verifier().verify(&source, &dir.path().join("gone")).await;
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(CopierError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_size_and_timestamp_within_tolerance() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source", b"data");
        let target = write_file(&dir, "target", b"data");

        let verifier = FileVerifier::new(VerifierConfig {
            method: VerificationMethod::SizeAndTimestamp,
            ..VerifierConfig::default()
        });
        let outcome = verifier.verify(&source, &target).await;
        // Created moments apart; the 2s default tolerance absorbs it
        assert!(outcome.success);
        assert_eq!(outcome.method, VerificationMethod::SizeAndTimestamp);
    }

    #[tokio::test]
    async fn test_size_only_detects_length_mismatch() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source", b"data");
        let target = write_file(&dir, "target", b"data+");

        let verifier = FileVerifier::new(VerifierConfig {
            method: VerificationMethod::SizeOnly,
            ..VerifierConfig::default()
        });
        let outcome = verifier.verify(&source, &target).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_ref().unwrap().to_string().contains("size mismatch"));
    }

    #[tokio::test]
    async fn test_auto_hashes_small_files_and_sizes_large_ones() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source", b"0123456789");
        let target = write_file(&dir, "target", b"0123456789");

        let small = FileVerifier::new(VerifierConfig {
            method: VerificationMethod::Auto,
            large_file_threshold: 1024,
            ..VerifierConfig::default()
        });
        assert_eq!(small.verify(&source, &target).await.method, VerificationMethod::Hash);

        let large = FileVerifier::new(VerifierConfig {
            method: VerificationMethod::Auto,
            large_file_threshold: 4,
            ..VerifierConfig::default()
        });
        assert_eq!(
            large.verify(&source, &target).await.method,
            VerificationMethod::SizeAndTimestamp
        );

        let forced = FileVerifier::new(VerifierConfig {
            method: VerificationMethod::Auto,
            large_file_threshold: 4,
            enable_large_file_hashing: true,
            ..VerifierConfig::default()
        });
        assert_eq!(forced.verify(&source, &target).await.method, VerificationMethod::Hash);
    }

    #[tokio::test]
    async fn test_verify_many_shares_the_source_digest() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source", b"shared-digest-data");
        let t1 = write_file(&dir, "t1", b"shared-digest-data");
        let t2 = write_file(&dir, "t2", b"shared-digest-data");
        let t3 = write_file(&dir, "t3", b"different-data!!!!");

        let outcomes = hash_verifier().verify_many(&source, &[&t1, &t2, &t3]).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].success);
        assert!(outcomes[1].success);
        assert!(!outcomes[2].success);
        // Every outcome carries the same source digest
        let digest = outcomes[0].source_hash.clone().unwrap();
        assert!(outcomes.iter().all(|o| o.source_hash.as_deref() == Some(digest.as_str())));
    }

    #[tokio::test]
    async fn test_reverification_of_unchanged_pair_is_stable() {
        let dir = TempDir::new().unwrap();
        let source = write_file(&dir, "source", b"stable");
        let target = write_file(&dir, "target", b"stable");

        let verifier = hash_verifier();
        let first = verifier.verify(&source, &target).await;
        let second = verifier.verify(&source, &target).await;
        assert_eq!(first, second);
    }
}
