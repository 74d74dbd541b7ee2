// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor storage and layout conversion.

use crate::{DType, Shape};
use memory_manager::MemoryError;

/// Errors that can occur while creating, converting or mutating tensors.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The allocator refused the request.
    #[error("tensor allocation failed: {0}")]
    Allocation(#[from] MemoryError),

    /// Supplied data does not match the tensor's byte size.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// `elempack` outside `{1, 4, 8, 16}`.
    #[error("invalid elempack {0} (expected 1, 4, 8 or 16)")]
    InvalidElempack(usize),

    /// The packed axis cannot be regrouped into the requested lane count.
    #[error("cannot repack {shape} from elempack {from} to {to}: packed axis length {len} is not divisible")]
    Packing {
        shape: Shape,
        from: usize,
        to: usize,
        len: usize,
    },

    /// In-place mutation was requested on a buffer shared with another tensor.
    #[error("tensor buffer is shared ({refs} references); call make_unique first")]
    Shared { refs: usize },

    /// The operation needs a specific storage type.
    #[error("dtype mismatch in {op}: expected {expected}, got {actual}")]
    DTypeMismatch {
        op: &'static str,
        expected: DType,
        actual: DType,
    },

    /// Per-lane fill vector has the wrong length.
    #[error("lane vector has {actual} values, tensor elempack is {elempack}")]
    LaneCount { elempack: usize, actual: usize },
}
