// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Prometheus metrics.

pub mod service;

pub use service::MetricsService;
