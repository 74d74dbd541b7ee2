// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for net loading and extraction.

use operators::{OpError, STATUS_ALLOCATION, STATUS_INVALID, STATUS_SHAPE};
use tensor_core::TensorError;

/// Errors raised by [`Net`](crate::Net) and [`Extractor`](crate::Extractor).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The model description or weights could not be loaded.
    #[error("model error: {0}")]
    Model(#[from] model_ir::ModelError),

    /// An operator failed while loading, preparing or running.
    #[error("layer '{layer}' failed: {source}")]
    Operator {
        layer: String,
        #[source]
        source: OpError,
    },

    /// No blob with this name exists in the graph.
    #[error("unknown blob '{0}'")]
    UnknownBlob(String),

    /// A needed graph input was never seeded.
    #[error("blob '{0}' is a graph input and was not given")]
    MissingInput(String),

    /// Inputs must be seeded before the first extraction.
    #[error("input '{0}' given after extraction started")]
    InputAfterExtract(String),

    /// Converting a blob between packings or storage types failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Numeric status code, matching the operator codes.
    pub fn status(&self) -> i32 {
        match self {
            RuntimeError::Operator { source, .. } => source.status(),
            RuntimeError::Tensor(TensorError::Allocation(_)) => STATUS_ALLOCATION,
            RuntimeError::Tensor(_) => STATUS_SHAPE,
            RuntimeError::Model(_)
            | RuntimeError::UnknownBlob(_)
            | RuntimeError::MissingInput(_)
            | RuntimeError::InputAfterExtract(_)
            | RuntimeError::Config(_) => STATUS_INVALID,
        }
    }

    pub(crate) fn operator(layer: &str, source: OpError) -> Self {
        RuntimeError::Operator {
            layer: layer.to_string(),
            source,
        }
    }
}
