// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operator errors and their numeric status codes.

use memory_manager::MemoryError;
use model_ir::ModelError;
use tensor_core::TensorError;

/// Status of a successful call.
pub const STATUS_OK: i32 = 0;
/// A buffer could not be acquired.
pub const STATUS_ALLOCATION: i32 = -100;
/// Input dimensions or packing are incompatible even after fallback.
pub const STATUS_SHAPE: i32 = -1;
/// No implementation exists for the request.
pub const STATUS_UNSUPPORTED: i32 = -2;
/// Parameters or weights are invalid.
pub const STATUS_INVALID: i32 = -3;

/// Errors raised while loading, preparing or running an operator.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// The blob or workspace allocator refused a request.
    #[error("allocation failed: {0}")]
    Allocation(#[source] MemoryError),

    /// Input shape, packing or dtype cannot be handled by any kernel.
    #[error("shape error: {0}")]
    Shape(String),

    /// No implementation is registered for the request.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A parameter is missing, malformed or out of range.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// A required weight is absent from the weight stream.
    #[error("layer '{layer}' is missing weight '{slot}'")]
    MissingWeight { layer: String, slot: String },
}

impl OpError {
    /// Numeric status code for this error.
    pub fn status(&self) -> i32 {
        match self {
            OpError::Allocation(_) => STATUS_ALLOCATION,
            OpError::Shape(_) => STATUS_SHAPE,
            OpError::Unsupported(_) => STATUS_UNSUPPORTED,
            OpError::InvalidParam(_) | OpError::MissingWeight { .. } => STATUS_INVALID,
        }
    }
}

impl From<MemoryError> for OpError {
    fn from(e: MemoryError) -> Self {
        OpError::Allocation(e)
    }
}

impl From<TensorError> for OpError {
    fn from(e: TensorError) -> Self {
        match e {
            TensorError::Allocation(m) => OpError::Allocation(m),
            other => OpError::Shape(other.to_string()),
        }
    }
}

impl From<ModelError> for OpError {
    fn from(e: ModelError) -> Self {
        OpError::InvalidParam(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let oom = OpError::from(TensorError::Allocation(MemoryError::ZeroSizedAllocation));
        assert_eq!(oom.status(), STATUS_ALLOCATION);
        let packing = OpError::from(TensorError::InvalidElempack(3));
        assert_eq!(packing.status(), STATUS_SHAPE);
        assert_eq!(OpError::Unsupported("x".into()).status(), STATUS_UNSUPPORTED);
        let missing = OpError::MissingWeight {
            layer: "conv".into(),
            slot: "weight".into(),
        };
        assert_eq!(missing.status(), STATUS_INVALID);
        assert!(missing.to_string().contains("conv"));
    }
}
