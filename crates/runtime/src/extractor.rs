// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! On-demand evaluation of one blob at a time.
//!
//! # Extraction
//!
//! ```text
//!   extract("out")
//!     1. walk producers back from "out", stopping at blobs already held
//!     2. run the needed layers in the net's topological order
//!          for each input: cast to the negotiated storage type,
//!                          convert to the negotiated packing
//!          forward, store outputs by blob id
//!          lightmode: drop inputs with no remaining scheduled consumer,
//!                     or overwrite a last-use input in place when the
//!                     operator supports it
//!     3. return "out" as elempack 1, f32
//! ```
//!
//! Blobs computed by one extraction stay in the extractor, so a second
//! extraction over shared ancestors only runs what is missing (under
//! lightmode, only what was not released). If a layer
//! fails, the blobs produced during that call are discarded and the
//! extractor can be used again.

use crate::{ExtractMetrics, Net, RuntimeError};
use memory_manager::SharedAllocator;
use model_ir::{BlobId, LayerDef, OpKind};
use operators::{ExecOptions, Operator};
use std::time::{Duration, Instant};
use tensor_core::{cast, convert_packing, DType, Tensor};

/// Execution context over a [`Net`]. Not shared between threads; create
/// one per concurrent request.
pub struct Extractor<'a> {
    net: &'a Net,
    opt: ExecOptions,
    /// Tensor per blob id, when held.
    blobs: Vec<Option<Tensor>>,
    /// Blobs supplied through `input`.
    seeded: Vec<bool>,
    started: bool,
    metrics: ExtractMetrics,
}

impl<'a> Extractor<'a> {
    pub(crate) fn new(net: &'a Net) -> Self {
        let n = net.graph().blobs().len();
        Self {
            net,
            opt: net.options().clone(),
            blobs: vec![None; n],
            seeded: vec![false; n],
            started: false,
            metrics: ExtractMetrics::default(),
        }
    }

    // ── Configuration ──────────────────────────────────────────────

    pub fn set_light_mode(&mut self, enable: bool) {
        self.opt.lightmode = enable;
    }

    pub fn set_num_threads(&mut self, num_threads: usize) {
        self.opt.num_threads = num_threads.max(1);
    }

    pub fn set_blob_allocator(&mut self, allocator: SharedAllocator) {
        self.opt.blob_allocator = Some(allocator);
    }

    pub fn set_workspace_allocator(&mut self, allocator: SharedAllocator) {
        self.opt.workspace_allocator = Some(allocator);
    }

    pub fn options(&self) -> &ExecOptions {
        &self.opt
    }

    /// Metrics of the most recent extraction.
    pub fn metrics(&self) -> &ExtractMetrics {
        &self.metrics
    }

    /// Drops every held blob and accepts inputs again.
    pub fn clear(&mut self) {
        self.blobs.iter_mut().for_each(|b| *b = None);
        self.seeded.iter_mut().for_each(|s| *s = false);
        self.started = false;
        self.metrics = ExtractMetrics::default();
    }

    // ── Inputs ─────────────────────────────────────────────────────

    /// Seeds blob `name` with `tensor`.
    pub fn input(&mut self, name: &str, tensor: Tensor) -> Result<(), RuntimeError> {
        let id = self.blob_id(name)?;
        self.input_by_id(id, tensor)
    }

    pub fn input_by_id(&mut self, id: BlobId, tensor: Tensor) -> Result<(), RuntimeError> {
        let name = self.blob_name(id)?;
        if self.started {
            return Err(RuntimeError::InputAfterExtract(name));
        }
        tracing::debug!("input '{name}': {} elempack {}", tensor.logical_shape(), tensor.elempack());
        self.blobs[id] = Some(tensor);
        self.seeded[id] = true;
        Ok(())
    }

    // ── Extraction ─────────────────────────────────────────────────

    /// Computes blob `name` and returns it as elempack 1, f32.
    pub fn extract(&mut self, name: &str) -> Result<Tensor, RuntimeError> {
        let id = self.blob_id(name)?;
        self.extract_by_id(id)
    }

    pub fn extract_by_id(&mut self, id: BlobId) -> Result<Tensor, RuntimeError> {
        let name = self.blob_name(id)?;
        self.started = true;
        let start = Instant::now();
        self.metrics = ExtractMetrics::new(&name);
        let before = self.opt.blob_allocator.as_ref().map(|a| a.stats());

        let schedule = self.schedule(id)?;
        tracing::debug!("extract '{name}': {} layers to run", schedule.len());

        let mut produced = Vec::new();
        if let Err(e) = self.run(&schedule, id, &mut produced) {
            for b in produced {
                if !self.seeded[b] {
                    self.blobs[b] = None;
                }
            }
            tracing::warn!("extract '{name}' failed: {e}");
            return Err(e);
        }

        let held = self.blobs[id].clone().ok_or_else(|| RuntimeError::MissingInput(name.clone()))?;
        let unpacked = convert_packing(&held, 1, self.opt.blob_alloc())?;
        let out = cast(&unpacked, DType::F32, self.opt.blob_alloc())?;

        let (peak, allocations) = match (&self.opt.blob_allocator, &before) {
            (Some(a), Some(before)) => {
                let now = a.stats();
                (now.peak_allocated_bytes, now.served_since(before))
            }
            _ => (0, 0),
        };
        self.metrics.finalise(start.elapsed(), peak, allocations);
        tracing::debug!("{}", self.metrics.summary());
        Ok(out)
    }

    /// Layers needed for `target`, in topological order.
    fn schedule(&mut self, target: BlobId) -> Result<Vec<usize>, RuntimeError> {
        let net = self.net;
        let graph = net.graph();
        let mut needed = vec![false; graph.num_layers()];
        let mut visited = vec![false; self.blobs.len()];
        let mut stack = vec![target];

        while let Some(b) = stack.pop() {
            if std::mem::replace(&mut visited[b], true) {
                continue;
            }
            if self.blobs[b].is_some() {
                if b != target {
                    self.metrics.reused_blobs += 1;
                }
                continue;
            }
            let info = graph.blob(b).ok_or_else(|| RuntimeError::UnknownBlob(b.to_string()))?;
            let producer = info.producer.and_then(|p| graph.layer(p));
            match producer {
                Some(layer) if layer.kind != OpKind::Input => {
                    needed[layer.index] = true;
                    stack.extend(layer.inputs.iter().copied());
                }
                _ => return Err(RuntimeError::MissingInput(info.name.clone())),
            }
        }

        Ok(graph.topo_order().iter().copied().filter(|&l| needed[l]).collect())
    }

    fn run(&mut self, schedule: &[usize], target: BlobId, produced: &mut Vec<BlobId>) -> Result<(), RuntimeError> {
        let net = self.net;
        let graph = net.graph();

        // Remaining scheduled consumers per blob.
        let mut remaining = vec![0usize; self.blobs.len()];
        for &l in schedule {
            if let Some(layer) = graph.layer(l) {
                for &b in &layer.inputs {
                    remaining[b] += 1;
                }
            }
        }

        for &l in schedule {
            let (Some(layer), Some(op)) = (graph.layer(l), net.operator(l)) else {
                return Err(RuntimeError::Config(format!("layer index {l} out of range")));
            };
            let (outputs, elapsed) = if self.can_run_inplace(layer, op, &remaining, target) {
                self.forward_inplace(layer, op)?
            } else {
                let inputs = self.gather_inputs(layer, op)?;
                let layer_start = Instant::now();
                let outputs = op
                    .forward(&inputs, &self.opt)
                    .map_err(|e| RuntimeError::operator(&layer.name, e))?;
                (outputs, layer_start.elapsed())
            };

            if outputs.len() != layer.outputs.len() {
                return Err(RuntimeError::operator(
                    &layer.name,
                    operators::OpError::Shape(format!(
                        "produced {} outputs for {} blobs",
                        outputs.len(),
                        layer.outputs.len()
                    )),
                ));
            }
            tracing::debug!(
                "ran {} ({}) on {} in {:.3}ms",
                layer.name,
                layer.kind,
                op.selected_backend(),
                elapsed.as_secs_f64() * 1000.0
            );
            self.metrics
                .record_layer(&layer.name, layer.kind.to_string(), op.selected_backend(), elapsed);

            for (&b, t) in layer.outputs.iter().zip(outputs) {
                self.blobs[b] = Some(t);
                produced.push(b);
            }

            if self.opt.lightmode {
                for &b in &layer.inputs {
                    remaining[b] -= 1;
                    if remaining[b] == 0 && !self.seeded[b] && b != target && self.blobs[b].take().is_some() {
                        self.metrics.released_blobs += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether `layer` may overwrite its input: lightmode is on, the
    /// operator has an in-place forward, and this is the last scheduled
    /// use of an input that was neither seeded nor requested.
    fn can_run_inplace(&self, layer: &LayerDef, op: &dyn Operator, remaining: &[usize], target: BlobId) -> bool {
        let caps = op.capabilities();
        if !(self.opt.lightmode && caps.support_inplace && caps.one_blob_only) {
            return false;
        }
        match (layer.inputs.as_slice(), layer.outputs.as_slice()) {
            ([b], [_]) => remaining[*b] == 1 && !self.seeded[*b] && *b != target,
            _ => false,
        }
    }

    /// Takes the single input of `layer`, negotiates it like any other
    /// input, and lets `op` overwrite it.
    ///
    /// `make_unique` copies the buffer when another blob still shares it,
    /// e.g. a sibling `Split` output.
    fn forward_inplace(
        &mut self,
        layer: &LayerDef,
        op: &dyn Operator,
    ) -> Result<(Vec<Tensor>, Duration), RuntimeError> {
        let b = layer.inputs[0];
        let held = self.blobs[b]
            .take()
            .ok_or_else(|| RuntimeError::MissingInput(self.net.graph().blobs()[b].name.clone()))?;
        self.metrics.released_blobs += 1;

        let mut t = self.negotiate(layer, op, held)?;
        t.make_unique()?;
        let layer_start = Instant::now();
        op.forward_inplace(&mut t, &self.opt)
            .map_err(|e| RuntimeError::operator(&layer.name, e))?;
        self.metrics.inplace_layers += 1;
        tracing::trace!("{}: overwrote '{}' in place", layer.name, self.net.graph().blobs()[b].name);
        Ok((vec![t], layer_start.elapsed()))
    }

    /// Inputs of `layer`, in the storage type and packing `op` asked for.
    fn gather_inputs(&mut self, layer: &LayerDef, op: &dyn Operator) -> Result<Vec<Tensor>, RuntimeError> {
        let mut inputs = Vec::with_capacity(layer.inputs.len());
        for &b in &layer.inputs {
            let held = self.blobs[b]
                .clone()
                .ok_or_else(|| RuntimeError::MissingInput(self.net.graph().blobs()[b].name.clone()))?;
            inputs.push(self.negotiate(layer, op, held)?);
        }
        Ok(inputs)
    }

    /// Casts `t` to the storage type and converts it to the packing `op`
    /// asked for, counting each conversion.
    fn negotiate(&mut self, layer: &LayerDef, op: &dyn Operator, mut t: Tensor) -> Result<Tensor, RuntimeError> {
        let caps = op.capabilities();
        let dtype = match self.opt.storage_dtype() {
            DType::F16 if caps.support_fp16_storage => DType::F16,
            DType::BF16 if caps.support_bf16_storage => DType::BF16,
            _ => DType::F32,
        };
        if t.dtype() != dtype {
            tracing::debug!("{}: cast {} -> {}", layer.name, t.dtype(), dtype);
            t = cast(&t, dtype, self.opt.workspace_alloc())?;
            self.metrics.dtype_conversions += 1;
        }

        let mut pack = if self.opt.use_packing_layout && caps.support_packing {
            op.preferred_elempack(&t, &self.opt)
        } else {
            1
        };
        if t.logical_shape().packed_axis_len() % pack != 0 {
            pack = 1;
        }
        if t.elempack() != pack {
            tracing::debug!("{}: repack {} -> {}", layer.name, t.elempack(), pack);
            t = convert_packing(&t, pack, self.opt.workspace_alloc())?;
            self.metrics.packing_conversions += 1;
        }
        Ok(t)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn blob_id(&self, name: &str) -> Result<BlobId, RuntimeError> {
        self.net
            .graph()
            .blob_id(name)
            .ok_or_else(|| RuntimeError::UnknownBlob(name.to_string()))
    }

    fn blob_name(&self, id: BlobId) -> Result<String, RuntimeError> {
        self.net
            .graph()
            .blob(id)
            .map(|b| b.name.clone())
            .ok_or_else(|| RuntimeError::UnknownBlob(id.to_string()))
    }
}

impl std::fmt::Debug for Extractor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("model", &self.net.graph().name)
            .field("held_blobs", &self.blobs.iter().filter(|b| b.is_some()).count())
            .field("started", &self.started)
            .field("lightmode", &self.opt.lightmode)
            .finish()
    }
}
