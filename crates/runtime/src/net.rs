// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A validated graph with one prepared operator per layer.
//!
//! ```text
//!   manifest + weights
//!         │  ModelLoader        parse, validate (ModelGraph<Validated>)
//!         ▼
//!   OperatorRegistry::create    one operator per layer
//!         │  load_model         take weights
//!         ▼
//!   create_pipeline             topological order, kernels selected
//!         │
//!         ▼
//!        Net ──► create_extractor() ──► Extractor
//! ```
//!
//! A failed load returns an error and no `Net`, so extraction over a
//! partially loaded model cannot be expressed. After loading, a `Net` is
//! read-only and can be shared between threads.

use crate::{Extractor, RuntimeError};
use model_ir::graph::Validated;
use model_ir::{LoadedModel, ModelGraph, ModelLoader};
use operators::{ExecOptions, Operator, OperatorRegistry};
use std::path::Path;
use std::time::Instant;

/// A loaded model, ready to run.
pub struct Net {
    graph: ModelGraph<Validated>,
    /// Indexed like `graph.layers()`.
    operators: Vec<Box<dyn Operator>>,
    opt: ExecOptions,
}

impl Net {
    /// Builds a net from manifest JSON and SafeTensors bytes.
    pub fn load(manifest_json: &str, weight_bytes: &[u8], opt: ExecOptions) -> Result<Self, RuntimeError> {
        Self::load_with_registry(manifest_json, weight_bytes, &OperatorRegistry::with_builtin(), opt)
    }

    /// Like [`Net::load`], instantiating operators through `registry`.
    pub fn load_with_registry(
        manifest_json: &str,
        weight_bytes: &[u8],
        registry: &OperatorRegistry,
        opt: ExecOptions,
    ) -> Result<Self, RuntimeError> {
        let model = ModelLoader::load_bytes(manifest_json, weight_bytes)?;
        Self::from_model_with_registry(model, registry, opt)
    }

    /// Reads `model.json` and `model.safetensors` from `dir`.
    pub fn load_dir(dir: &Path, opt: ExecOptions) -> Result<Self, RuntimeError> {
        Self::from_model(ModelLoader::load_dir(dir)?, opt)
    }

    pub fn from_model(model: LoadedModel, opt: ExecOptions) -> Result<Self, RuntimeError> {
        Self::from_model_with_registry(model, &OperatorRegistry::with_builtin(), opt)
    }

    /// Instantiates, loads and prepares every layer of `model`.
    pub fn from_model_with_registry(
        model: LoadedModel,
        registry: &OperatorRegistry,
        opt: ExecOptions,
    ) -> Result<Self, RuntimeError> {
        opt.validate().map_err(|e| RuntimeError::Config(e.to_string()))?;
        let start = Instant::now();
        let LoadedModel { graph, weights } = model;

        let mut operators = Vec::with_capacity(graph.num_layers());
        for layer in graph.layers() {
            let mut op = registry
                .create(layer)
                .map_err(|e| RuntimeError::operator(&layer.name, e))?;
            op.load_model(&weights)
                .map_err(|e| RuntimeError::operator(&layer.name, e))?;
            operators.push(op);
        }

        for &index in graph.topo_order() {
            let op = &mut operators[index];
            op.create_pipeline(&opt)
                .map_err(|e| RuntimeError::operator(op.name(), e))?;
            tracing::debug!("pipeline {}: {}", op.name(), op.selected_backend());
        }

        tracing::info!(
            "net '{}' ready: {} layers in {:.2}ms",
            graph.name,
            operators.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Self { graph, operators, opt })
    }

    /// A fresh execution context over this net.
    pub fn create_extractor(&self) -> Extractor<'_> {
        Extractor::new(self)
    }

    pub fn graph(&self) -> &ModelGraph<Validated> {
        &self.graph
    }

    /// Options the pipelines were built with; extractors start from a copy.
    pub fn options(&self) -> &ExecOptions {
        &self.opt
    }

    pub fn operator(&self, layer: usize) -> Option<&dyn Operator> {
        self.operators.get(layer).map(|op| op.as_ref())
    }

    /// `(layer name, tier:kernel)` for every layer, in model order.
    pub fn layer_backends(&self) -> Vec<(String, String)> {
        self.operators
            .iter()
            .map(|op| (op.name().to_string(), op.selected_backend()))
            .collect()
    }
}

impl std::fmt::Debug for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Net")
            .field("model", &self.graph.name)
            .field("layers", &self.operators.len())
            .field("opt", &self.opt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{OpKind, WeightArchive};

    const MANIFEST: &str = r#"{
        "name": "conv-relu",
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"], "params": { "w": 6, "h": 6, "c": 4 } },
            { "type": "Convolution", "name": "conv", "inputs": ["data"], "outputs": ["c"],
              "params": { "num_output": 8, "kernel_w": 3, "bias_term": 1 } },
            { "type": "ReLU", "name": "relu", "inputs": ["c"], "outputs": ["out"] }
        ]
    }"#;

    fn weights() -> Vec<u8> {
        let mut archive = WeightArchive::new();
        archive
            .add_f32("conv.weight", &[8, 4, 3, 3], &vec![0.01; 8 * 4 * 9])
            .add_f32("conv.bias", &[8], &[0.0; 8]);
        archive.to_bytes().unwrap()
    }

    #[test]
    fn test_load_prepares_every_layer() {
        let net = Net::load(MANIFEST, &weights(), ExecOptions::default()).unwrap();
        assert_eq!(net.graph().num_layers(), 3);
        let backends = net.layer_backends();
        assert_eq!(backends[0], ("data".to_string(), "none".to_string()));
        assert!(backends[1].1.contains(':'));
        assert_eq!(net.operator(2).map(|op| op.kind()), Some(OpKind::ReLU));
        assert!(format!("{net:?}").contains("conv-relu"));
    }

    #[test]
    fn test_missing_weight_is_load_error() {
        let err = Net::load(MANIFEST, &[], ExecOptions::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::Operator { ref layer, .. } if layer == "conv"));
        assert_eq!(err.status(), operators::STATUS_INVALID);
    }

    #[test]
    fn test_registry_without_kind() {
        let mut registry = OperatorRegistry::new();
        for kind in [OpKind::Input, OpKind::Convolution] {
            registry.register(kind, std::sync::Arc::new(operators::create_operator));
        }
        assert!(!registry.contains(OpKind::ReLU));
        let err = Net::load_with_registry(MANIFEST, &weights(), &registry, ExecOptions::default()).unwrap_err();
        assert_eq!(err.status(), operators::STATUS_UNSUPPORTED);
    }

    #[test]
    fn test_invalid_options() {
        let opt = ExecOptions {
            num_threads: 0,
            ..Default::default()
        };
        assert!(matches!(Net::load(MANIFEST, &weights(), opt), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_net_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Net>();
    }
}
