// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end extraction.
//!
//! These tests drive the full path from manifest and weight bytes through
//! `Net` loading, operator preparation, layout negotiation and on-demand
//! extraction, proving that the five library crates compose correctly.

use memory_manager::{Allocator, MemoryBudget, PoolAllocator, SharedAllocator};
use model_ir::{LayerDef, ModelError, OpKind, WeightArchive, WeightStore};
use operators::{create_operator, Capabilities, ExecOptions, OpError, Operator, OperatorRegistry, Tier};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use runtime::{Net, RuntimeConfig, RuntimeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tensor_core::{DType, Shape, Tensor};

// ── Helpers ────────────────────────────────────────────────────

/// conv 3x3 → relu → deconv 2x2/2 → border padding.
const PYRAMID: &str = r#"{
    "name": "pyramid",
    "layers": [
        { "type": "Input", "name": "data", "outputs": ["data"], "params": { "w": 8, "h": 8, "c": 16 } },
        { "type": "Convolution", "name": "conv", "inputs": ["data"], "outputs": ["c"],
          "params": { "num_output": 16, "kernel_w": 3, "pad_left": 1, "bias_term": 1 } },
        { "type": "ReLU", "name": "relu", "inputs": ["c"], "outputs": ["r"] },
        { "type": "Deconvolution", "name": "up", "inputs": ["r"], "outputs": ["u"],
          "params": { "num_output": 8, "kernel_w": 2, "stride_w": 2, "bias_term": 1 } },
        { "type": "Padding", "name": "border", "inputs": ["u"], "outputs": ["out"],
          "params": { "left": 1, "top": 1, "value": 0.5 } }
    ]
}"#;

/// Two branches off one convolution, joined by an elementwise sum.
const BRANCHY: &str = r#"{
    "name": "branchy",
    "layers": [
        { "type": "Input", "name": "data", "outputs": ["data"], "params": { "w": 6, "h": 6, "c": 8 } },
        { "type": "Convolution", "name": "conv", "inputs": ["data"], "outputs": ["c"],
          "params": { "num_output": 8, "kernel_w": 1 } },
        { "type": "Split", "name": "split", "inputs": ["c"], "outputs": ["c1", "c2"] },
        { "type": "ReLU", "name": "relu", "inputs": ["c1"], "outputs": ["r"] },
        { "type": "Eltwise", "name": "sum", "inputs": ["r", "c2"], "outputs": ["out"],
          "params": { "op_type": 1 } }
    ]
}"#;

fn random(n: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn pyramid_weights(seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut archive = WeightArchive::new();
    archive
        .add_f32("conv.weight", &[16, 16, 3, 3], &random(16 * 16 * 9, &mut rng))
        .add_f32("conv.bias", &[16], &random(16, &mut rng))
        .add_f32("up.weight", &[16, 8, 2, 2], &random(16 * 8 * 4, &mut rng))
        .add_f32("up.bias", &[8], &random(8, &mut rng));
    archive.to_bytes().unwrap()
}

fn branchy_weights() -> Vec<u8> {
    let w: Vec<f32> = (0..64).map(|i| if i % 9 == 0 { 1.0 } else { -0.05 }).collect();
    let mut archive = WeightArchive::new();
    archive.add_f32("conv.weight", &[8, 8, 1, 1], &w);
    archive.to_bytes().unwrap()
}

fn input(shape: Shape, seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    Tensor::from_f32(shape, &random(shape.num_elements(), &mut rng)).unwrap()
}

fn run(net: &Net, data: &Tensor, target: &str) -> Tensor {
    let mut ex = net.create_extractor();
    ex.input("data", data.clone()).unwrap();
    ex.extract(target).unwrap()
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol, "element {i}: {x} vs {y}");
    }
}

/// Wraps a built-in operator and counts `forward` calls.
struct Counting {
    inner: Box<dyn Operator>,
    calls: Arc<AtomicUsize>,
}

impl Operator for Counting {
    fn kind(&self) -> OpKind {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn load_model(&mut self, weights: &WeightStore) -> Result<(), OpError> {
        self.inner.load_model(weights)
    }

    fn create_pipeline(&mut self, opt: &ExecOptions) -> Result<(), OpError> {
        self.inner.create_pipeline(opt)
    }

    fn preferred_elempack(&self, input: &Tensor, opt: &ExecOptions) -> usize {
        self.inner.preferred_elempack(input, opt)
    }

    fn forward(&self, inputs: &[Tensor], opt: &ExecOptions) -> Result<Vec<Tensor>, OpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.forward(inputs, opt)
    }

    fn forward_inplace(&self, blob: &mut Tensor, opt: &ExecOptions) -> Result<(), OpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.forward_inplace(blob, opt)
    }

    fn selected_backend(&self) -> String {
        self.inner.selected_backend()
    }
}

fn counting_registry(kind: OpKind, calls: &Arc<AtomicUsize>) -> OperatorRegistry {
    let calls = Arc::clone(calls);
    let mut registry = OperatorRegistry::with_builtin();
    registry.register(
        kind,
        Arc::new(move |layer: &LayerDef| {
            Ok(Box::new(Counting {
                inner: create_operator(layer)?,
                calls: Arc::clone(&calls),
            }) as Box<dyn Operator>)
        }),
    );
    registry
}

// ── Memoization ────────────────────────────────────────────────

#[test]
fn test_shared_ancestor_runs_once_per_extractor() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(OpKind::Convolution, &calls);
    let opt = ExecOptions {
        lightmode: false,
        ..Default::default()
    };
    let net = Net::load_with_registry(BRANCHY, &branchy_weights(), &registry, opt).unwrap();
    let data = input(Shape::d3(6, 6, 8), 1);

    let mut ex = net.create_extractor();
    ex.input("data", data.clone()).unwrap();
    let r = ex.extract("r").unwrap();
    let c2 = ex.extract("c2").unwrap();
    let out = ex.extract("out").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let expected: Vec<f32> = r.to_f32_vec().iter().zip(c2.to_f32_vec()).map(|(a, b)| a + b).collect();
    assert_close(&out.to_f32_vec(), &expected, 1e-6);

    // A fresh extractor starts from nothing.
    run(&net, &data, "out");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_repeated_extract_returns_held_blob() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(OpKind::ReLU, &calls);
    let opt = ExecOptions {
        lightmode: false,
        ..Default::default()
    };
    let net = Net::load_with_registry(BRANCHY, &branchy_weights(), &registry, opt).unwrap();

    let mut ex = net.create_extractor();
    ex.input("data", input(Shape::d3(6, 6, 8), 2)).unwrap();
    let first = ex.extract("out").unwrap();
    let second = ex.extract("out").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.to_f32_vec(), second.to_f32_vec());
    assert!(ex.metrics().layer_metrics.is_empty());
}

// ── Graph rejection ────────────────────────────────────────────

#[test]
fn test_cyclic_graph_rejected() {
    let manifest = r#"{
        "name": "cyclic",
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"] },
            { "type": "Eltwise", "name": "a", "inputs": ["data", "y"], "outputs": ["x"] },
            { "type": "ReLU", "name": "b", "inputs": ["x"], "outputs": ["y"] }
        ]
    }"#;
    let err = Net::load(manifest, &[], ExecOptions::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::Model(ModelError::Cycle { .. })));
}

#[test]
fn test_unknown_operator_rejected() {
    let manifest = r#"{
        "name": "unknown-op",
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"] },
            { "type": "Softmax", "name": "prob", "inputs": ["data"], "outputs": ["prob"] }
        ]
    }"#;
    let err = Net::load(manifest, &[], ExecOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Model(ModelError::UnknownOperator { ref op_type, .. }) if op_type == "Softmax"
    ));
}

// ── Layout ─────────────────────────────────────────────────────

#[test]
fn test_identity_padding_passes_buffer_through() {
    let manifest = r#"{
        "name": "identity-pad",
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"], "params": { "w": 5, "h": 5, "c": 3 } },
            { "type": "Padding", "name": "pad", "inputs": ["data"], "outputs": ["out"] }
        ]
    }"#;
    let net = Net::load(manifest, &[], ExecOptions::default()).unwrap();
    let pool = Arc::new(PoolAllocator::unbounded());

    let data = input(Shape::d3(5, 5, 3), 3);
    let mut ex = net.create_extractor();
    ex.set_blob_allocator(pool.clone() as SharedAllocator);
    ex.input("data", data.clone()).unwrap();
    let out = ex.extract("out").unwrap();

    assert!(out.shares_buffer_with(&data));
    assert_eq!(pool.stats().total_allocations, 0);
    assert_eq!(ex.metrics().blob_allocations, 0);
    assert_eq!(ex.metrics().packing_conversions, 0);
}

#[test]
fn test_every_tier_matches_scalar() {
    let weights = pyramid_weights(7);
    let data = input(Shape::d3(8, 8, 16), 8);

    let scalar = Net::load(
        PYRAMID,
        &weights,
        ExecOptions {
            max_tier: Some(Tier::Scalar),
            use_packing_layout: false,
            ..Default::default()
        },
    )
    .unwrap();
    let expected = run(&scalar, &data, "out");
    assert_eq!(expected.logical_shape(), Shape::d3(17, 17, 8));

    for tier in Tier::available() {
        let net = Net::load(
            PYRAMID,
            &weights,
            ExecOptions {
                max_tier: Some(*tier),
                ..Default::default()
            },
        )
        .unwrap();
        let out = run(&net, &data, "out");
        assert_eq!(out.elempack(), 1);
        assert_eq!(out.dtype(), DType::F32);
        assert_close(&out.to_f32_vec(), &expected.to_f32_vec(), 1e-4);
    }
}

#[test]
fn test_fp16_storage_close_to_f32() {
    let weights = pyramid_weights(9);
    let data = input(Shape::d3(8, 8, 16), 10);

    let f32_net = Net::load(PYRAMID, &weights, ExecOptions::default()).unwrap();
    let fp16_net = Net::load(
        PYRAMID,
        &weights,
        ExecOptions {
            use_fp16_storage: true,
            ..Default::default()
        },
    )
    .unwrap();

    let a = run(&f32_net, &data, "out");
    let b = run(&fp16_net, &data, "out");
    assert_eq!(b.dtype(), DType::F32);
    assert_close(&a.to_f32_vec(), &b.to_f32_vec(), 0.1);
}

// ── Concurrency ────────────────────────────────────────────────

#[test]
fn test_concurrent_extractors_agree() {
    let net = Net::load(PYRAMID, &pyramid_weights(11), ExecOptions::default()).unwrap();
    let data = input(Shape::d3(8, 8, 16), 12);
    let expected = run(&net, &data, "out").to_f32_vec();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| run(&net, &data, "out").to_f32_vec()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

// ── Memory ─────────────────────────────────────────────────────

#[test]
fn test_blob_budget_exhaustion_reports_allocation_status() {
    let net = Net::load(PYRAMID, &pyramid_weights(13), ExecOptions::default()).unwrap();
    let mut ex = net.create_extractor();
    ex.set_blob_allocator(Arc::new(PoolAllocator::new(MemoryBudget::from_bytes(256))));
    ex.input("data", input(Shape::d3(8, 8, 16), 14)).unwrap();

    let err = ex.extract("out").unwrap_err();
    assert_eq!(err.status(), operators::STATUS_ALLOCATION);

    // The seeded input survives the failure; partial results do not.
    ex.set_blob_allocator(Arc::new(PoolAllocator::unbounded()));
    let out = ex.extract("out").unwrap();
    assert_eq!(ex.metrics().layer_metrics.len(), 4);
    assert_eq!(out.logical_shape(), Shape::d3(17, 17, 8));
}

#[test]
fn test_lightmode_releases_intermediates() {
    let net = Net::load(PYRAMID, &pyramid_weights(15), ExecOptions::default()).unwrap();
    let mut ex = net.create_extractor();
    ex.input("data", input(Shape::d3(8, 8, 16), 16)).unwrap();
    ex.extract("out").unwrap();
    assert_eq!(ex.metrics().released_blobs, 3);
    assert_eq!(ex.metrics().inplace_layers, 1);
    assert_eq!(ex.metrics().layer_metrics.len(), 4);
}

#[test]
fn test_inplace_relu_allocates_no_blob() {
    let manifest = r#"{
        "name": "relu-chain",
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"], "params": { "w": 5, "h": 5, "c": 3 } },
            { "type": "ReLU", "name": "r1", "inputs": ["data"], "outputs": ["a"] },
            { "type": "ReLU", "name": "r2", "inputs": ["a"], "outputs": ["out"], "params": { "slope": 0.1 } }
        ]
    }"#;
    let data = input(Shape::d3(5, 5, 3), 21);
    let expected: Vec<f32> = data.to_f32_vec().iter().map(|&v| v.max(0.0)).collect();

    let extract = |lightmode: bool| {
        let opt = ExecOptions {
            lightmode,
            ..Default::default()
        };
        let net = Net::load(manifest, &[], opt).unwrap();
        let pool = Arc::new(PoolAllocator::unbounded());
        let mut ex = net.create_extractor();
        ex.set_blob_allocator(pool as SharedAllocator);
        ex.input("data", data.clone()).unwrap();
        let out = ex.extract("out").unwrap();
        (out, ex.metrics().clone())
    };

    // r1 must not touch the seeded input; r2 reuses r1's output.
    let (out, metrics) = extract(true);
    assert_close(&out.to_f32_vec(), &expected, 0.0);
    assert_eq!(metrics.inplace_layers, 1);
    assert_eq!(metrics.blob_allocations, 1);
    assert!(data.to_f32_vec().iter().any(|&v| v < 0.0));

    let (out, metrics) = extract(false);
    assert_close(&out.to_f32_vec(), &expected, 0.0);
    assert_eq!(metrics.inplace_layers, 0);
    assert_eq!(metrics.blob_allocations, 2);
}

#[test]
fn test_inplace_relu_leaves_split_sibling_intact() {
    let data = input(Shape::d3(6, 6, 8), 22);
    let run_with = |lightmode: bool| {
        let opt = ExecOptions {
            lightmode,
            ..Default::default()
        };
        let net = Net::load(BRANCHY, &branchy_weights(), opt).unwrap();
        let mut ex = net.create_extractor();
        ex.input("data", data.clone()).unwrap();
        let out = ex.extract("out").unwrap();
        (out.to_f32_vec(), ex.metrics().inplace_layers)
    };
    let (light, inplace) = run_with(true);
    let (heavy, copied) = run_with(false);
    assert_eq!(inplace, 1);
    assert_eq!(copied, 0);
    assert_close(&light, &heavy, 0.0);
}

// ── Configuration ──────────────────────────────────────────────

#[test]
fn test_config_loads_model_dir() {
    let dir = std::env::temp_dir().join(format!("packrt_it_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(model_ir::MANIFEST_FILE), PYRAMID).unwrap();
    std::fs::write(dir.join(model_ir::WEIGHTS_FILE), pyramid_weights(17)).unwrap();

    let toml = format!(
        "model_path = {:?}\nmemory_budget = \"64M\"\nnum_threads = 2\nmax_tier = \"scalar\"\n",
        dir.display().to_string()
    );
    let config = RuntimeConfig::from_toml(&toml).unwrap();
    let net = config.load_net().unwrap();
    assert_eq!(net.options().num_threads, 2);
    assert!(net.layer_backends().iter().all(|(_, b)| !b.starts_with("avx")));

    let out = run(&net, &input(Shape::d3(8, 8, 16), 18), "out");
    assert_eq!(out.logical_shape(), Shape::d3(17, 17, 8));

    let back = RuntimeConfig::from_toml(&config.to_toml().unwrap()).unwrap();
    assert_eq!(back, config);
    std::fs::remove_dir_all(&dir).ok();
}
