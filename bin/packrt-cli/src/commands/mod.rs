// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the helpers they share.

pub mod benchmark;
pub mod inspect;
pub mod run;
pub mod tiers;

use anyhow::Context;
use model_ir::BlobId;
use operators::Tier;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use runtime::{Net, RuntimeConfig};
use std::path::{Path, PathBuf};
use tensor_core::{Shape, Tensor};
use tracing_subscriber::EnvFilter;

/// Options shared by every command that loads a net.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Path to the model directory (`model.json` + `model.safetensors`).
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Blob memory budget (e.g., "256M", "1G", "unlimited").
    #[arg(short = 'b', long)]
    pub memory_budget: Option<String>,

    /// Worker threads per layer.
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Keep every blob at elempack 1.
    #[arg(long)]
    pub no_packing: bool,

    /// Store activations as fp16 where operators allow it.
    #[arg(long, conflicts_with = "bf16")]
    pub fp16: bool,

    /// Store activations as bf16 where operators allow it.
    #[arg(long)]
    pub bf16: bool,

    /// Keep intermediate blobs alive after their last consumer.
    #[arg(long)]
    pub no_lightmode: bool,

    /// Highest instruction-set tier kernels may use (scalar, sse2, avx2, avx512, neon).
    #[arg(long)]
    pub max_tier: Option<Tier>,
}

/// Sets up the tracing subscriber. `RUST_LOG` wins over `-v` flags.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads `--config` if given and applies command-line overrides on top.
pub fn resolve_config(path: Option<&Path>, args: &ExecArgs) -> anyhow::Result<RuntimeConfig> {
    let mut config = match path {
        Some(p) => RuntimeConfig::from_file(p)?,
        None => RuntimeConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if let Some(budget) = &args.memory_budget {
        config.memory_budget = budget.clone();
    }
    if args.threads.is_some() {
        config.num_threads = args.threads;
    }
    if args.no_packing {
        config.use_packing_layout = false;
    }
    if args.fp16 {
        config.use_fp16_storage = true;
        config.use_bf16_storage = false;
    }
    if args.bf16 {
        config.use_bf16_storage = true;
        config.use_fp16_storage = false;
    }
    if args.no_lightmode {
        config.lightmode = false;
    }
    if args.max_tier.is_some() {
        config.max_tier = args.max_tier;
    }
    tracing::debug!("resolved config: {config:?}");
    Ok(config)
}

/// Parses `w`, `w,h`, `w,h,c` or `w,h,d,c`.
pub fn parse_shape(s: &str) -> anyhow::Result<Shape> {
    let dims = s
        .split(',')
        .map(|d| d.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid shape '{s}'"))?;
    if dims.contains(&0) {
        anyhow::bail!("shape '{s}' has a zero extent");
    }
    match dims[..] {
        [w] => Ok(Shape::d1(w)),
        [w, h] => Ok(Shape::d2(w, h)),
        [w, h, c] => Ok(Shape::d3(w, h, c)),
        [w, h, d, c] => Ok(Shape::d4(w, h, d, c)),
        _ => anyhow::bail!("shape '{s}' must have 1 to 4 extents"),
    }
}

/// Picks the input blob and its shape from flags or the model's declarations.
pub fn resolve_input(net: &Net, name: Option<&str>, shape: Option<&str>) -> anyhow::Result<(BlobId, Shape)> {
    let graph = net.graph();
    let id = match name {
        Some(n) => graph.blob_id(n).with_context(|| format!("model has no blob '{n}'"))?,
        None => *graph
            .input_blobs()
            .first()
            .context("model declares no input blob; pass --input")?,
    };
    let shape = match (shape, graph.blob(id).and_then(|b| b.shape)) {
        (Some(s), _) => parse_shape(s)?,
        (None, Some(declared)) => declared,
        (None, None) => anyhow::bail!("input shape is not declared; pass --input-shape"),
    };
    Ok((id, shape))
}

/// A tensor of uniform values in `[-1, 1)`.
pub fn random_tensor(shape: Shape, seed: u64) -> anyhow::Result<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..shape.num_elements()).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    Ok(Tensor::from_f32(shape, &values)?)
}

/// Truncates a string with ellipsis.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("8").unwrap(), Shape::d1(8));
        assert_eq!(parse_shape("32, 32, 3").unwrap(), Shape::d3(32, 32, 3));
        assert_eq!(parse_shape("4,4,2,8").unwrap(), Shape::d4(4, 4, 2, 8));
        assert!(parse_shape("1,2,3,4,5").is_err());
        assert!(parse_shape("3,x").is_err());
        assert!(parse_shape("3,0").is_err());
    }

    #[test]
    fn test_overrides_apply_over_defaults() {
        let args = ExecArgs {
            threads: Some(3),
            no_packing: true,
            fp16: true,
            max_tier: Some(Tier::Scalar),
            ..Default::default()
        };
        let c = resolve_config(None, &args).unwrap();
        assert_eq!(c.num_threads, Some(3));
        assert!(!c.use_packing_layout);
        assert!(c.use_fp16_storage);
        assert!(c.lightmode);
        assert_eq!(c.max_tier, Some(Tier::Scalar));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("conv1", 10), "conv1");
        assert_eq!(truncate("encoder.block3.conv", 10), "encoder...");
    }
}
