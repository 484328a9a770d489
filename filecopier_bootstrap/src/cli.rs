// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface
//!
//! Bootstrap-layer CLI handling: clap parsing followed by a validation pass
//! that checks paths and enum-like string arguments before anything touches
//! the application layers.
//!
//! The service surface is deliberately small - it runs unattended, so almost
//! everything lives in the configuration file:
//!
//! - `filecopier run --config <file> [--source <dir>] [--log-level <level>]`
//! - `filecopier validate-config --config <file>`

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by CLI parsing or validation.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid log level '{0}' (expected trace, debug, info, warn, or error)")]
    InvalidLogLevel(String),
}

/// Raw clap surface. Kept private to the bootstrap layer; the application
/// only ever sees [`ValidatedCli`].
#[derive(Parser, Debug)]
#[command(
    name = "filecopier",
    version,
    about = "Unattended file replication service: watches a source directory and streams completed files to multiple targets with integrity verification"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the replication service until a shutdown signal arrives
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured source directory
        #[arg(long)]
        source: Option<PathBuf>,

        /// Override the configured log level
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Load and validate a configuration file, then exit
    ValidateConfig {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Validated command variants handed to the application.
#[derive(Debug, Clone)]
pub enum ValidatedCommand {
    Run {
        config: PathBuf,
        source_override: Option<PathBuf>,
        log_level_override: Option<String>,
    },
    ValidateConfig {
        config: PathBuf,
    },
}

/// CLI arguments after validation.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub command: ValidatedCommand,
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Parses and validates CLI arguments.
///
/// Clap handles `--help`/`--version` itself (and exits). Validation here
/// checks that named files exist and that the log level, if given, is one
/// tracing understands - catching both before the service starts keeps
/// misconfiguration failures at exit-code level rather than mid-run.
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    validate(Cli::parse())
}

fn validate(cli: Cli) -> Result<ValidatedCli, ParseError> {
    let command = match cli.command {
        Commands::Run {
            config,
            source,
            log_level,
        } => {
            require_file(&config)?;
            if let Some(ref level) = log_level {
                validate_log_level(level)?;
            }
            ValidatedCommand::Run {
                config,
                source_override: source,
                log_level_override: log_level,
            }
        }
        Commands::ValidateConfig { config } => {
            require_file(&config)?;
            ValidatedCommand::ValidateConfig { config }
        }
    };
    Ok(ValidatedCli { command })
}

fn require_file(path: &PathBuf) -> Result<(), ParseError> {
    if !path.is_file() {
        return Err(ParseError::ConfigNotFound(path.clone()));
    }
    Ok(())
}

fn validate_log_level(level: &str) -> Result<(), ParseError> {
    if LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ParseError::InvalidLogLevel(level.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_config() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# empty config").unwrap();
        file
    }

    #[test]
    fn test_run_command_validates() {
        let config = temp_config();
        let cli = Cli::parse_from(["filecopier", "run", "--config", config.path().to_str().unwrap()]);
        let validated = validate(cli).unwrap();
        assert!(matches!(validated.command, ValidatedCommand::Run { .. }));
    }

    #[test]
    fn test_missing_config_is_rejected() {
        let cli = Cli::parse_from(["filecopier", "run", "--config", "/nonexistent/filecopier.toml"]);
        assert!(matches!(validate(cli), Err(ParseError::ConfigNotFound(_))));
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        let config = temp_config();
        let cli = Cli::parse_from([
            "filecopier",
            "run",
            "--config",
            config.path().to_str().unwrap(),
            "--log-level",
            "loud",
        ]);
        assert!(matches!(validate(cli), Err(ParseError::InvalidLogLevel(_))));
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let config = temp_config();
        let cli = Cli::parse_from([
            "filecopier",
            "run",
            "--config",
            config.path().to_str().unwrap(),
            "--log-level",
            "DEBUG",
        ]);
        assert!(validate(cli).is_ok());
    }

    #[test]
    fn test_validate_config_subcommand() {
        let config = temp_config();
        let cli = Cli::parse_from(["filecopier", "validate-config", "--config", config.path().to_str().unwrap()]);
        let validated = validate(cli).unwrap();
        assert!(matches!(validated.command, ValidatedCommand::ValidateConfig { .. }));
    }
}
