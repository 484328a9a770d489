// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Exit Codes
//!
//! Sysexits-style exit codes for the host environment. The service promises
//! exactly three outcomes: 0 for a normal shutdown, a configuration code for
//! startup misconfiguration, and a software code for a fatal runtime error.
//! Per-file failures never terminate the process and therefore never reach
//! this module.

/// Process exit codes the service can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Normal shutdown (signal-initiated or natural completion)
    Success,
    /// CLI usage error (sysexits EX_USAGE)
    UsageError,
    /// Configuration could not be loaded or failed validation at startup
    /// (sysexits EX_CONFIG)
    ConfigError,
    /// Fatal service error at runtime (sysexits EX_SOFTWARE)
    SoftwareError,
}

impl ExitCode {
    /// Numeric code for the OS
    pub fn code(self) -> u8 {
        match self {
            ExitCode::Success => 0,
            ExitCode::UsageError => 64,
            ExitCode::ConfigError => 78,
            ExitCode::SoftwareError => 70,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code())
    }
}
