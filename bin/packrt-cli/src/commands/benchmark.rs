// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `packrt benchmark` command: sweep instruction-set tiers and layouts.
//!
//! Loads the model once per configuration, warms up with one extraction,
//! then times `iterations` fresh extractors and prints a comparison table.

use super::{random_tensor, resolve_input};
use runtime::{Net, RuntimeConfig};
use std::time::Instant;
use tensor_core::Shape;

pub fn execute(base: RuntimeConfig, input_shape: Option<String>, iterations: usize) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              packrt · Benchmark Suite               ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let iterations = iterations.max(1);
    let ceiling = base.max_tier;
    let tiers: Vec<operators::Tier> = operators::Tier::available()
        .iter()
        .copied()
        .filter(|t| ceiling.map_or(true, |c| t.width() <= c.width()))
        .collect();

    println!("  Model:      {}", base.model_path.display());
    println!("  Tiers:      {:?}", tiers.iter().map(|t| t.as_str()).collect::<Vec<_>>());
    println!("  Iterations: {iterations}");
    println!();

    // ── Results Table ──────────────────────────────────────────
    println!(
        "  {:<8} {:<10} {:>10} {:>10} {:>10} {:>8} {:>10}",
        "Tier", "Layout", "Mean", "Min", "Compute", "Repack", "Peak MB",
    );
    println!("  {}", "-".repeat(74));

    let mut results: Vec<BenchResult> = Vec::new();
    for &tier in &tiers {
        for packing in [true, false] {
            let config = RuntimeConfig {
                max_tier: Some(tier),
                use_packing_layout: packing && base.use_packing_layout,
                ..base.clone()
            };
            let layout = if config.use_packing_layout { "packed" } else { "unpacked" };
            match run_single(&config, input_shape.as_deref(), iterations) {
                Ok(r) => {
                    println!(
                        "  {:<8} {:<10} {:>8.3}ms {:>8.3}ms {:>8.3}ms {:>8} {:>10.2}",
                        tier.as_str(),
                        layout,
                        r.mean_ms,
                        r.min_ms,
                        r.compute_ms,
                        r.repacks,
                        r.peak_mb,
                    );
                    results.push(BenchResult { tier, layout, ..r });
                }
                Err(e) => println!("  {:<8} {:<10}     FAILED: {e}", tier.as_str(), layout),
            }
            if !base.use_packing_layout {
                break;
            }
        }
    }
    println!();

    // ── Summary ────────────────────────────────────────────────
    let Some(fastest) = results.iter().min_by(|a, b| a.mean_ms.total_cmp(&b.mean_ms)) else {
        println!("  No successful benchmark runs.");
        return Ok(());
    };
    let slowest = results.iter().max_by(|a, b| a.mean_ms.total_cmp(&b.mean_ms)).unwrap_or(fastest);

    println!("  Summary:");
    println!("   Fastest:  {} {} ({:.3}ms)", fastest.tier, fastest.layout, fastest.mean_ms);
    println!(
        "   Speedup:  {:.2}x over {} {}",
        slowest.mean_ms / fastest.mean_ms.max(f64::EPSILON),
        slowest.tier,
        slowest.layout,
    );
    println!();

    Ok(())
}

#[derive(Debug)]
struct BenchResult {
    tier: operators::Tier,
    layout: &'static str,
    mean_ms: f64,
    min_ms: f64,
    compute_ms: f64,
    repacks: usize,
    peak_mb: f64,
}

/// Loads the net for one configuration and times `iterations` extractions.
fn run_single(config: &RuntimeConfig, input_shape: Option<&str>, iterations: usize) -> anyhow::Result<BenchResult> {
    let net = config.load_net()?;
    let (input, shape) = resolve_input(&net, None, input_shape)?;
    let output = *net
        .graph()
        .output_blobs()
        .first()
        .ok_or_else(|| anyhow::anyhow!("model has no output blob"))?;

    // Warm up: populates the pools' free lists.
    extract_once(&net, input, shape, output)?;

    let mut total_ms = 0.0;
    let mut min_ms = f64::INFINITY;
    let mut last = runtime::ExtractMetrics::default();
    for _ in 0..iterations {
        let start = Instant::now();
        last = extract_once(&net, input, shape, output)?;
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        total_ms += ms;
        min_ms = min_ms.min(ms);
    }

    Ok(BenchResult {
        tier: operators::Tier::Scalar,
        layout: "",
        mean_ms: total_ms / iterations as f64,
        min_ms,
        compute_ms: last.compute_duration.as_secs_f64() * 1000.0,
        repacks: last.packing_conversions,
        peak_mb: last.peak_blob_bytes as f64 / (1024.0 * 1024.0),
    })
}

fn extract_once(
    net: &Net,
    input: model_ir::BlobId,
    shape: Shape,
    output: model_ir::BlobId,
) -> anyhow::Result<runtime::ExtractMetrics> {
    let mut ex = net.create_extractor();
    ex.input_by_id(input, random_tensor(shape, 0)?)?;
    ex.extract_by_id(output)?;
    Ok(ex.metrics().clone())
}
