// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model graph: layers connected through named blobs.
//!
//! # Type-State Pattern
//!
//! ```text
//! ModelGraph<Loaded>    : names resolved, kinds known, not yet checked.
//!       │  .validate()
//!       ▼
//! ModelGraph<Validated> : acyclic, no dangling blobs, shapes consistent,
//!                          topological order computed.
//! ```
//!
//! The runtime only accepts `ModelGraph<Validated>`, so a net can never be
//! built over a graph that failed any of these checks.
//!
//! # Blob Table
//!
//! Every blob has at most one producer and any number of consumers:
//!
//! ```text
//!   data ──► conv1 ──► c1 ──► split ──► c1a ──► relu ──► r
//!                                   └──► c1b ──────────► eltwise ──► out
//! ```

use crate::geometry::{ConvParams, PadParams};
use crate::{LayerDef, ModelError, ModelManifest, OpKind};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;
use tensor_core::Shape;

/// Index into the blob table.
pub type BlobId = usize;

/// A named slot between a producer and its consumers.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub name: String,
    pub producer: Option<usize>,
    pub consumers: Vec<usize>,
    /// Declared or inferred logical shape.
    pub shape: Option<Shape>,
}

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been built but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph passed validation and carries a topological order.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── ModelGraph ─────────────────────────────────────────────────────

/// Layers plus blob table. `S` records whether validation has run.
#[derive(Debug, Clone)]
pub struct ModelGraph<S: GraphState = Loaded> {
    pub name: String,
    layers: Vec<LayerDef>,
    blobs: Vec<BlobInfo>,
    blob_index: HashMap<String, BlobId>,
    topo_order: Vec<usize>,
    _state: PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl ModelGraph<Loaded> {
    /// Resolves blob names and operator kinds.
    ///
    /// # Errors
    /// - Manifest-level problems (see [`ModelManifest::validate`]).
    /// - [`ModelError::UnknownOperator`] for unrecognised layer types.
    /// - [`ModelError::DuplicateProducer`] when two layers write one blob.
    /// - [`ModelError::ShapeMismatch`] for declarations of unused blobs.
    pub fn from_manifest(manifest: &ModelManifest) -> Result<Self, ModelError> {
        manifest.validate()?;

        let mut graph = Self {
            name: manifest.name.clone(),
            layers: Vec::with_capacity(manifest.layers.len()),
            blobs: Vec::new(),
            blob_index: HashMap::new(),
            topo_order: Vec::new(),
            _state: PhantomData,
        };

        for (index, entry) in manifest.layers.iter().enumerate() {
            let kind: OpKind = entry.layer_type.parse().map_err(|op_type| ModelError::UnknownOperator {
                layer: entry.name.clone(),
                op_type,
            })?;

            let inputs: Vec<BlobId> = entry
                .inputs
                .iter()
                .map(|name| {
                    let id = graph.intern(name);
                    graph.blobs[id].consumers.push(index);
                    id
                })
                .collect();

            let mut outputs = Vec::with_capacity(entry.outputs.len());
            for name in &entry.outputs {
                let id = graph.intern(name);
                if let Some(first) = graph.blobs[id].producer {
                    return Err(ModelError::DuplicateProducer {
                        blob: name.clone(),
                        first: manifest.layers[first].name.clone(),
                        second: entry.name.clone(),
                    });
                }
                graph.blobs[id].producer = Some(index);
                outputs.push(id);
            }

            graph.layers.push(LayerDef {
                name: entry.name.clone(),
                kind,
                index,
                inputs,
                outputs,
                params: entry.params.clone(),
            });
        }

        for decl in &manifest.blobs {
            let id = graph.blob_index.get(&decl.name).copied().ok_or_else(|| ModelError::ShapeMismatch {
                blob: decl.name.clone(),
                detail: "declared but not used by any layer".into(),
            })?;
            graph.blobs[id].shape = Some(Shape::from(decl.shape.as_slice()));
        }

        Ok(graph)
    }

    /// Checks the graph and computes its topological order.
    ///
    /// # Checks
    /// - Non-empty, layer arities match their kinds.
    /// - Every consumed blob has a producer.
    /// - No cycles (Kahn's algorithm; ties broken by file order).
    /// - Declared blob shapes agree with Input parameters and with the
    ///   shapes inferred through the graph.
    pub fn validate(mut self) -> Result<ModelGraph<Validated>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph("model graph contains no layers".into()));
        }

        for layer in &self.layers {
            check_arity(layer)?;
        }

        for blob in &self.blobs {
            if blob.producer.is_none() {
                let layer = blob
                    .consumers
                    .first()
                    .map(|&l| self.layers[l].name.clone())
                    .unwrap_or_default();
                return Err(ModelError::DanglingBlob {
                    blob: blob.name.clone(),
                    layer,
                });
            }
        }

        let order = self.topological_order()?;
        self.topo_order = order;
        self.infer_shapes()?;

        tracing::debug!(
            "validated graph '{}': {} layers, {} blobs",
            self.name,
            self.layers.len(),
            self.blobs.len()
        );

        Ok(ModelGraph {
            name: self.name,
            layers: self.layers,
            blobs: self.blobs,
            blob_index: self.blob_index,
            topo_order: self.topo_order,
            _state: PhantomData,
        })
    }

    fn intern(&mut self, name: &str) -> BlobId {
        if let Some(&id) = self.blob_index.get(name) {
            return id;
        }
        let id = self.blobs.len();
        self.blobs.push(BlobInfo {
            name: name.to_string(),
            producer: None,
            consumers: Vec::new(),
            shape: None,
        });
        self.blob_index.insert(name.to_string(), id);
        id
    }

    fn topological_order(&self) -> Result<Vec<usize>, ModelError> {
        let mut pending: Vec<usize> = self.layers.iter().map(|l| l.inputs.len()).collect();
        let mut ready: BTreeSet<usize> = (0..self.layers.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(self.layers.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &blob in &self.layers[next].outputs {
                for &consumer in &self.blobs[blob].consumers {
                    pending[consumer] -= 1;
                    if pending[consumer] == 0 {
                        ready.insert(consumer);
                    }
                }
            }
        }

        if order.len() < self.layers.len() {
            let layers = (0..self.layers.len())
                .filter(|&i| pending[i] > 0)
                .map(|i| self.layers[i].name.clone())
                .collect();
            return Err(ModelError::Cycle { layers });
        }
        Ok(order)
    }

    fn infer_shapes(&mut self) -> Result<(), ModelError> {
        for &index in &self.topo_order {
            let layer = &self.layers[index];
            let known: Vec<Option<Shape>> = layer.inputs.iter().map(|&b| self.blobs[b].shape).collect();
            let inferred = infer_output(layer, &known)?;
            for (&blob, shape) in layer.outputs.iter().zip(inferred) {
                let Some(shape) = shape else { continue };
                let slot = &mut self.blobs[blob];
                match slot.shape {
                    Some(declared) if declared != shape => {
                        return Err(ModelError::ShapeMismatch {
                            blob: slot.name.clone(),
                            detail: format!("declared {declared} but '{}' produces {shape}", layer.name),
                        })
                    }
                    _ => slot.shape = Some(shape),
                }
            }
        }
        Ok(())
    }
}

fn check_arity(layer: &LayerDef) -> Result<(), ModelError> {
    let (min_in, max_in, min_out, max_out) = layer.kind.arity();
    let (n_in, n_out) = (layer.inputs.len(), layer.outputs.len());
    if n_in < min_in || n_in > max_in || n_out < min_out || n_out > max_out {
        return Err(ModelError::InvalidLayer {
            layer: layer.name.clone(),
            detail: format!("{} takes {n_in} inputs and {n_out} outputs, which its kind does not allow", layer.kind),
        });
    }
    Ok(())
}

fn invalid(layer: &LayerDef, detail: String) -> ModelError {
    ModelError::InvalidLayer {
        layer: layer.name.clone(),
        detail,
    }
}

/// Output shapes of `layer` given what is known about its inputs.
fn infer_output(layer: &LayerDef, inputs: &[Option<Shape>]) -> Result<Vec<Option<Shape>>, ModelError> {
    let first = inputs.first().copied().flatten();
    let single = |s: Option<Shape>| vec![s];
    let shapes = match layer.kind {
        OpKind::Input => single(input_shape(layer)?),
        OpKind::ReLU => single(first),
        OpKind::Split => vec![first; layer.outputs.len()],
        OpKind::Eltwise => {
            let known: Vec<Shape> = inputs.iter().flatten().copied().collect();
            if let Some(other) = known.iter().find(|s| **s != known[0]) {
                return Err(invalid(layer, format!("inputs disagree: {} vs {other}", known[0])));
            }
            single(known.first().copied())
        }
        OpKind::Padding => {
            let pad = PadParams::from_params(&layer.params)?;
            single(first.map(|s| pad.output_shape(s)))
        }
        OpKind::Convolution | OpKind::Deconvolution => {
            let conv = ConvParams::from_params(&layer.params)?;
            match first {
                None => single(None),
                Some(s) if s.rank() != 3 => {
                    return Err(invalid(layer, format!("expects a [w, h, c] input, got {s}")));
                }
                Some(s) => {
                    let out = if layer.kind == OpKind::Convolution {
                        conv.conv_output(s.w(), s.h())
                    } else {
                        conv.deconv_output(s.w(), s.h())
                    };
                    let (w, h) = out.ok_or_else(|| invalid(layer, format!("window does not fit input {s}")))?;
                    single(Some(Shape::d3(w, h, conv.num_output)))
                }
            }
        }
    };
    Ok(shapes)
}

/// Shape from Input params `w`, `h`, `d`, `c` (0 = absent).
fn input_shape(layer: &LayerDef) -> Result<Option<Shape>, ModelError> {
    let p = &layer.params;
    let (w, h, d, c) = (p.usize("w", 0)?, p.usize("h", 0)?, p.usize("d", 0)?, p.usize("c", 0)?);
    let shape = match (w, h, d, c) {
        (0, 0, 0, 0) => None,
        (w, 0, 0, 0) => Some(Shape::d1(w)),
        (w, h, 0, 0) if w > 0 => Some(Shape::d2(w, h)),
        (w, h, 0, c) if w > 0 && h > 0 => Some(Shape::d3(w, h, c)),
        (w, h, d, c) if w > 0 && h > 0 && c > 0 => Some(Shape::d4(w, h, d, c)),
        _ => return Err(invalid(layer, format!("incomplete input extents w={w} h={h} d={d} c={c}"))),
    };
    Ok(shape)
}

// ── Validated state ────────────────────────────────────────────────

impl ModelGraph<Validated> {
    /// Layer indices in execution order.
    pub fn topo_order(&self) -> &[usize] {
        &self.topo_order
    }

    /// Shape of a blob if it was declared or could be inferred.
    pub fn blob_shape(&self, id: BlobId) -> Option<Shape> {
        self.blobs.get(id).and_then(|b| b.shape)
    }

    /// Blobs produced by `Input` layers, i.e. the ones callers seed.
    pub fn input_blobs(&self) -> Vec<BlobId> {
        self.layers
            .iter()
            .filter(|l| l.kind == OpKind::Input)
            .flat_map(|l| l.outputs.iter().copied())
            .collect()
    }

    /// Blobs no layer consumes: the natural extraction targets.
    pub fn output_blobs(&self) -> Vec<BlobId> {
        (0..self.blobs.len())
            .filter(|&b| self.blobs[b].consumers.is_empty())
            .collect()
    }

    pub fn summary(&self) -> String {
        let inputs: Vec<&str> = self.input_blobs().iter().map(|&b| self.blobs[b].name.as_str()).collect();
        let outputs: Vec<&str> = self.output_blobs().iter().map(|&b| self.blobs[b].name.as_str()).collect();
        format!(
            "Model '{}': {} layers, {} blobs, inputs {:?}, outputs {:?}",
            self.name,
            self.layers.len(),
            self.blobs.len(),
            inputs,
            outputs,
        )
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: GraphState> ModelGraph<S> {
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[LayerDef] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&LayerDef> {
        self.layers.get(index)
    }

    pub fn blobs(&self) -> &[BlobInfo] {
        &self.blobs
    }

    pub fn blob(&self, id: BlobId) -> Option<&BlobInfo> {
        self.blobs.get(id)
    }

    pub fn blob_id(&self, name: &str) -> Option<BlobId> {
        self.blob_index.get(name).copied()
    }
}

impl<S: GraphState> fmt::Display for ModelGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ModelGraph '{}' ({} layers):", self.name, self.layers.len())?;
        for layer in &self.layers {
            writeln!(f, "  {}", layer.summary())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(json: &str) -> Result<ModelGraph<Validated>, ModelError> {
        ModelGraph::from_manifest(&ModelManifest::from_json(json)?)?.validate()
    }

    const DIAMOND: &str = r#"{
        "name": "diamond",
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"], "params": { "w": 6, "h": 6, "c": 4 } },
            { "type": "Split", "name": "split", "inputs": ["data"], "outputs": ["a", "b"] },
            { "type": "ReLU", "name": "relu", "inputs": ["a"], "outputs": ["ra"] },
            { "type": "Convolution", "name": "conv", "inputs": ["b"], "outputs": ["cb"],
              "params": { "num_output": 4, "kernel_w": 3, "pad_left": 1 } },
            { "type": "Eltwise", "name": "sum", "inputs": ["ra", "cb"], "outputs": ["out"],
              "params": { "op_type": 1 } }
        ]
    }"#;

    #[test]
    fn test_diamond_validates() {
        let g = load(DIAMOND).unwrap();
        assert_eq!(g.num_layers(), 5);
        assert_eq!(g.topo_order(), &[0, 1, 2, 3, 4]);
        let out = g.blob_id("out").unwrap();
        assert_eq!(g.blob_shape(out), Some(Shape::d3(6, 6, 4)));
        assert_eq!(g.output_blobs(), vec![out]);
        assert_eq!(g.input_blobs(), vec![g.blob_id("data").unwrap()]);
        assert_eq!(g.blob(g.blob_id("data").unwrap()).unwrap().consumers, vec![1]);
    }

    #[test]
    fn test_topo_order_independent_of_file_order() {
        let g = load(
            r#"{ "name": "rev", "layers": [
                { "type": "ReLU", "name": "r2", "inputs": ["x1"], "outputs": ["x2"] },
                { "type": "ReLU", "name": "r1", "inputs": ["x0"], "outputs": ["x1"] },
                { "type": "Input", "name": "in", "outputs": ["x0"] }
            ] }"#,
        )
        .unwrap();
        assert_eq!(g.topo_order(), &[2, 1, 0]);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = load(
            r#"{ "name": "cyc", "layers": [
                { "type": "Input", "name": "in", "outputs": ["x"] },
                { "type": "Eltwise", "name": "a", "inputs": ["x", "z"], "outputs": ["y"] },
                { "type": "ReLU", "name": "b", "inputs": ["y"], "outputs": ["z"] }
            ] }"#,
        )
        .unwrap_err();
        match err {
            ModelError::Cycle { layers } => assert_eq!(layers, vec!["a".to_string(), "b".to_string()]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = load(
            r#"{ "name": "loop", "layers": [
                { "type": "ReLU", "name": "r", "inputs": ["x"], "outputs": ["x"] }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Cycle { .. }));
    }

    #[test]
    fn test_dangling_blob_rejected() {
        let err = load(
            r#"{ "name": "d", "layers": [
                { "type": "ReLU", "name": "r", "inputs": ["ghost"], "outputs": ["y"] }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::DanglingBlob { ref blob, ref layer } if blob == "ghost" && layer == "r"));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let manifest = ModelManifest::from_json(
            r#"{ "name": "d", "layers": [
                { "type": "Input", "name": "a", "outputs": ["x"] },
                { "type": "Input", "name": "b", "outputs": ["x"] }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(
            ModelGraph::from_manifest(&manifest),
            Err(ModelError::DuplicateProducer { .. })
        ));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = load(
            r#"{ "name": "u", "layers": [
                { "type": "Input", "name": "in", "outputs": ["x"] },
                { "type": "Softmax", "name": "sm", "inputs": ["x"], "outputs": ["y"] }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::UnknownOperator { ref op_type, .. } if op_type == "Softmax"));
    }

    #[test]
    fn test_arity_rejected() {
        let err = load(
            r#"{ "name": "a", "layers": [
                { "type": "Input", "name": "in", "outputs": ["x"] },
                { "type": "Eltwise", "name": "e", "inputs": ["x"], "outputs": ["y"] }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidLayer { ref layer, .. } if layer == "e"));
    }

    #[test]
    fn test_declared_shape_conflict() {
        let err = load(
            r#"{ "name": "s",
                 "blobs": [ { "name": "x", "shape": [4, 4, 3] } ],
                 "layers": [
                    { "type": "Input", "name": "in", "outputs": ["x"], "params": { "w": 4, "h": 4, "c": 8 } }
                 ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { ref blob, .. } if blob == "x"));
    }

    #[test]
    fn test_eltwise_shape_conflict() {
        let err = load(
            r#"{ "name": "s", "layers": [
                { "type": "Input", "name": "a", "outputs": ["a"], "params": { "w": 4, "h": 4, "c": 3 } },
                { "type": "Input", "name": "b", "outputs": ["b"], "params": { "w": 5, "h": 4, "c": 3 } },
                { "type": "Eltwise", "name": "e", "inputs": ["a", "b"], "outputs": ["y"] }
            ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidLayer { ref layer, .. } if layer == "e"));
    }

    #[test]
    fn test_summary_and_display() {
        let g = load(DIAMOND).unwrap();
        assert!(g.summary().contains("5 layers"));
        assert!(format!("{g}").contains("conv (Convolution)"));
    }
}
