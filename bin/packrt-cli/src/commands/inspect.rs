// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `packrt inspect` command: display model structure and kernel choices.
//!
//! Loads the manifest and weights, prepares every layer for the resolved
//! options, and prints layers, blobs and the kernel each layer selected.

use super::truncate;
use model_ir::ModelLoader;
use runtime::{Net, RuntimeConfig};

pub fn execute(config: RuntimeConfig) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              packrt · Model Inspector               ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let model = ModelLoader::load_files(&config.manifest_path(), Some(&config.weights_path()))
        .map_err(|e| anyhow::anyhow!("failed to load model from '{}': {e}", config.model_path.display()))?;
    let weight_count = model.weights.len();
    let weight_mb = model.weights.total_bytes() as f64 / (1024.0 * 1024.0);
    let net = Net::from_model(model, config.exec_options()?)?;
    let graph = net.graph();

    // ── Summary ────────────────────────────────────────────────
    println!("  Model:   {}", graph.name);
    println!("  Layers:  {}", graph.num_layers());
    println!("  Blobs:   {}", graph.blobs().len());
    println!("  Weights: {weight_count} tensors, {weight_mb:.2} MB");
    println!("  Graph:   {}", graph.summary());
    println!();

    // ── Per-Layer Detail ───────────────────────────────────────
    println!(
        "  {:<4} {:<24} {:<14} {:<20} {:<20} {:<22}",
        "Idx", "Name", "Type", "Inputs", "Outputs", "Kernel",
    );
    println!("  {}", "-".repeat(108));

    let blob_names = |ids: &[model_ir::BlobId]| -> String {
        ids.iter()
            .map(|&b| graph.blobs()[b].name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };
    for (layer, (_, backend)) in graph.layers().iter().zip(net.layer_backends()) {
        println!(
            "  {:<4} {:<24} {:<14} {:<20} {:<20} {:<22}",
            layer.index,
            truncate(&layer.name, 24),
            layer.kind.to_string(),
            truncate(&blob_names(&layer.inputs), 20),
            truncate(&blob_names(&layer.outputs), 20),
            backend,
        );
    }
    println!();

    // ── Blobs ──────────────────────────────────────────────────
    println!("  {:<24} {:<18} {:<24} {:>9}", "Blob", "Shape", "Producer", "Consumers");
    println!("  {}", "-".repeat(78));
    for blob in graph.blobs() {
        let shape = blob.shape.map(|s| s.to_string()).unwrap_or_else(|| "?".to_string());
        let producer = blob
            .producer
            .and_then(|p| graph.layer(p))
            .map(|l| l.name.as_str())
            .unwrap_or("-");
        println!(
            "  {:<24} {:<18} {:<24} {:>9}",
            truncate(&blob.name, 24),
            shape,
            truncate(producer, 24),
            blob.consumers.len(),
        );
    }
    println!();

    Ok(())
}
