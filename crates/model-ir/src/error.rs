// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model loading and graph validation.

/// Errors raised while reading a model or validating its graph.
///
/// Every variant is a load-time failure: a graph that produced one of
/// these never reaches the runtime.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The model file could not be read.
    #[error("failed to read model file: {0}")]
    ManifestRead(#[from] std::io::Error),

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    /// The weight stream is malformed or uses an unsupported storage type.
    #[error("invalid weight stream: {0}")]
    Weights(String),

    /// A layer names an operator type the runtime does not know.
    #[error("layer '{layer}': unknown operator type '{op_type}'")]
    UnknownOperator { layer: String, op_type: String },

    /// Two layers share a name.
    #[error("duplicate layer name '{0}'")]
    DuplicateLayer(String),

    /// A layer definition is malformed (wrong arity, bad params, ...).
    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    /// A parameter has the wrong type.
    #[error("parameter '{key}': expected {expected}")]
    InvalidParam { key: String, expected: &'static str },

    /// A layer consumes a blob nobody produces.
    #[error("blob '{blob}' consumed by '{layer}' has no producer")]
    DanglingBlob { blob: String, layer: String },

    /// Two layers write the same blob.
    #[error("blob '{blob}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        blob: String,
        first: String,
        second: String,
    },

    /// The layer dependencies contain a cycle.
    #[error("graph contains a cycle through layers {layers:?}")]
    Cycle { layers: Vec<String> },

    /// A declared blob shape contradicts the graph.
    #[error("blob '{blob}': {detail}")]
    ShapeMismatch { blob: String, detail: String },

    /// The graph is structurally unusable.
    #[error("invalid model graph: {0}")]
    InvalidGraph(String),
}
