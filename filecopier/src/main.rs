// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Copier Binary
//!
//! Composition root: parse and validate the CLI, load and validate the
//! configuration, initialize logging, build the replication service, run
//! until a shutdown signal arrives, and map the outcome onto an exit code.
//!
//! Exit codes: 0 on normal shutdown, 64 for CLI usage errors, 78 for
//! configuration errors at startup, 70 for fatal service errors.

use filecopier::infrastructure::config::settings::Settings;
use filecopier::infrastructure::logging;
use filecopier::ReplicationService;
use filecopier_bootstrap::shutdown::ShutdownCoordinator;
use filecopier_bootstrap::{parse_and_validate, signals, ExitCode, ValidatedCommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = match parse_and_validate() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::UsageError.into();
        }
    };

    match cli.command {
        ValidatedCommand::ValidateConfig { config } => validate_config(&config).into(),
        ValidatedCommand::Run {
            config,
            source_override,
            log_level_override,
        } => run(&config, source_override, log_level_override).await.into(),
    }
}

/// Loads, overrides, and validates a configuration file, printing the
/// effective settings on success.
fn validate_config(config_path: &Path) -> ExitCode {
    let mut settings = match Settings::load(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::ConfigError;
        }
    };
    settings.apply_env_overrides();
    if let Err(e) = settings.validate() {
        eprintln!("configuration error: {}", e);
        return ExitCode::ConfigError;
    }
    match toml::to_string_pretty(&settings) {
        Ok(rendered) => {
            println!("{}", rendered);
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("cannot render effective settings: {}", e);
            ExitCode::SoftwareError
        }
    }
}

async fn run(config_path: &Path, source_override: Option<PathBuf>, log_level_override: Option<String>) -> ExitCode {
    let mut settings = match Settings::load(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::ConfigError;
        }
    };
    settings.apply_env_overrides();
    if let Some(source) = source_override {
        settings.directories.source = source;
    }
    if let Some(level) = log_level_override {
        settings.logging.level = level;
    }
    if let Err(e) = settings.validate() {
        eprintln!("configuration error: {}", e);
        return ExitCode::ConfigError;
    }

    if let Err(e) = logging::init(&settings.logging.level, settings.logging.file_path.as_deref()) {
        eprintln!("configuration error: {}", e);
        return ExitCode::ConfigError;
    }

    let coordinator = ShutdownCoordinator::new(settings.shutdown_timeout());
    let service = match ReplicationService::new(settings) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "service construction failed");
            return ExitCode::SoftwareError;
        }
    };
    if let Err(e) = service.start(coordinator.token()) {
        error!(error = %e, "service startup failed");
        return ExitCode::SoftwareError;
    }

    info!("service running; waiting for shutdown signal");
    signals::wait_for_shutdown_signal(&coordinator).await;

    service.shutdown().await;
    coordinator.mark_complete();

    let stats = service.stats();
    info!(
        files_detected = stats.detector.files_detected,
        files_queued = stats.detector.files_queued,
        items_completed = stats.queue.items_completed,
        items_failed = stats.queue.items_failed,
        "final statistics"
    );
    ExitCode::Success
}
