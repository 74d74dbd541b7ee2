// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `packrt run` command: seed one input and extract one blob.
//!
//! ```text
//! RuntimeConfig → load_net → Net → create_extractor → input → extract
//! ```

use super::{random_tensor, resolve_input, truncate};
use anyhow::Context;
use runtime::RuntimeConfig;

/// Flags specific to `run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: Option<String>,
    pub input_shape: Option<String>,
    pub output: Option<String>,
    pub seed: u64,
    pub show_layers: bool,
}

pub fn execute(config: RuntimeConfig, run: RunOptions) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              packrt · Extraction Runner             ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Load ───────────────────────────────────────────────────
    println!("  [1/3] Loading model from {}...", config.model_path.display());
    let net = config.load_net()?;
    let opt = net.options();
    println!("        {}", net.graph().summary());
    println!(
        "        threads {}  packing {}  storage {}  lightmode {}",
        opt.num_threads,
        if opt.use_packing_layout { "on" } else { "off" },
        opt.storage_dtype(),
        if opt.lightmode { "on" } else { "off" },
    );
    println!();

    // ── Input ──────────────────────────────────────────────────
    let (input_id, shape) = resolve_input(&net, run.input.as_deref(), run.input_shape.as_deref())?;
    let output_id = match run.output.as_deref() {
        Some(name) => net
            .graph()
            .blob_id(name)
            .with_context(|| format!("model has no blob '{name}'"))?,
        None => *net
            .graph()
            .output_blobs()
            .first()
            .context("model has no output blob; pass --output")?,
    };
    let input_name = blob_name(&net, input_id);
    let output_name = blob_name(&net, output_id);

    println!("  [2/3] Seeding '{input_name}' with {shape} (seed {})...", run.seed);
    let mut ex = net.create_extractor();
    ex.input_by_id(input_id, random_tensor(shape, run.seed)?)?;
    println!();

    // ── Extract ────────────────────────────────────────────────
    println!("  [3/3] Extracting '{output_name}'...");
    let out = ex.extract_by_id(output_id)?;
    println!();

    let values = out.to_f32_vec();
    let (min, max, sum) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY, 0.0f64), |(lo, hi, s), &v| {
            (lo.min(v), hi.max(v), s + v as f64)
        });
    let mean = if values.is_empty() { 0.0 } else { sum / values.len() as f64 };

    println!("  Output:");
    println!("   Blob:   {output_name}");
    println!("   Shape:  {}", out.logical_shape());
    println!("   Range:  [{min:.5}, {max:.5}]  mean {mean:.5}");
    println!(
        "   First:  {:?}{}",
        &values[..values.len().min(6)],
        if values.len() > 6 { " ..." } else { "" },
    );
    println!();

    let metrics = ex.metrics();
    println!("  Metrics:");
    println!("   {}", metrics.summary());
    println!();

    if run.show_layers {
        println!("  {:<28} {:<16} {:<24} {:>10}", "Layer", "Type", "Kernel", "Time");
        println!("  {}", "-".repeat(82));
        for m in &metrics.layer_metrics {
            println!(
                "  {:<28} {:<16} {:<24} {:>8.3}ms",
                truncate(&m.layer_name, 28),
                m.kind,
                m.backend,
                m.duration.as_secs_f64() * 1000.0,
            );
        }
        println!();
    }

    Ok(())
}

fn blob_name(net: &runtime::Net, id: model_ir::BlobId) -> String {
    net.graph()
        .blob(id)
        .map(|b| b.name.clone())
        .unwrap_or_else(|| id.to_string())
}
