// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Copier
//!
//! Long-running file replication service. Watches a single source directory
//! for newly arrived large files (the shaping use case is whole-slide
//! pathology images tens of GB in size), waits until each file has finished
//! being written, then streams it to every configured target directory while
//! verifying integrity - all without ever taking an exclusive lock on the
//! source, with memory bounded by the chunk size regardless of file size,
//! and with an auditable record of every file it touches.
//!
//! ## Architecture
//!
//! The crate is split along the same layering as the domain crate it builds
//! on:
//!
//! - **Application layer** (`application::services`) - the processing queue
//!   that fans each ready file out to its destinations under bounded
//!   concurrency, and the replication service that wires the completion
//!   detector to the queue and owns both lifetimes
//! - **Infrastructure layer** (`infrastructure`) - the completion detector
//!   (filesystem notifications + stability polling + rescan), the streaming
//!   copy engine, the hashing verifier, the retry executor with its circuit
//!   breaker, the quarantine/recovery service, configuration loading,
//!   structured logging with the JSONL audit sink, and Prometheus metrics
//!
//! ## Data flow
//!
//! ```text
//! notify events ─▶ CompletionDetector ─▶ ready queue ─▶ forwarder
//!                    (stability polls)                     │
//!                                                         ▼
//!                                                 ProcessingQueue
//!                                                    │ workers
//!                               RetryExecutor ◀──────┤
//!                                    │               │
//!                          CopyEngine / FileVerifier │
//!                                    │               ▼
//!                             RecoveryService ◀─ classifier
//!                               (quarantine)
//! ```

pub mod application;
pub mod infrastructure;

pub use application::services::processing_queue::{ProcessingQueue, QueueHealth, QueueStatus};
pub use application::services::replication_service::{ReplicationService, ServiceStats};
pub use infrastructure::config::settings::Settings;
