// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Signal Handling
//!
//! Translates OS termination signals into a shutdown request on the
//! coordinator. On Unix both SIGINT and SIGTERM are handled (the service is
//! expected to run under a process supervisor that sends SIGTERM); elsewhere
//! only Ctrl-C is available.

use crate::shutdown::ShutdownCoordinator;

/// Waits for a termination signal, then initiates shutdown on the
/// coordinator. Returns after initiating; callers should then wait on the
/// coordinator for completion.
pub async fn wait_for_shutdown_signal(coordinator: &ShutdownCoordinator) {
    wait_for_signal().await;
    coordinator.initiate();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            // Without a SIGTERM stream we can still honour Ctrl-C
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        // Pend forever rather than spinning; shutdown can still be driven
        // programmatically through the coordinator
        std::future::pending::<()>().await;
    } else {
        tracing::info!("received Ctrl-C");
    }
}
