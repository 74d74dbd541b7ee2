// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for buffer allocation.

/// Errors that can occur while handing out tensor storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// The request would push live bytes past the allocator's ceiling.
    #[error("out of memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// Attempted to allocate a zero-sized buffer.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// Alignment must be a power of two no larger than [`MAX_ALIGN`](crate::MAX_ALIGN).
    #[error("unsupported alignment {align} (must be a power of two <= {max})")]
    UnsupportedAlignment { align: usize, max: usize },

    /// A budget string could not be parsed.
    #[error("invalid memory budget '{0}': expected a number followed by an optional suffix (K, M, G)")]
    InvalidBudget(String),
}
