// /////////////////////////////////////////////////////////////////////////////
// File Copier
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain entities: mutable objects with identity and lifecycle rules.

pub mod processing_item;

pub use processing_item::{DestinationEntry, DestinationStatus, ErrorRecord, ItemState, ProcessingItem};
