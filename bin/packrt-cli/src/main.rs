// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # packrt
//!
//! Command-line interface for the packrt inference runtime.
//!
//! ## Usage
//! ```bash
//! # Extract the default output blob for a random input
//! packrt run --model ./models/tiny-unet --input-shape 64,64,3
//!
//! # Compare tiers and layouts
//! packrt benchmark --model ./models/tiny-unet --iterations 20
//!
//! # Inspect model structure and the kernels each layer would use
//! packrt inspect --model ./models/tiny-unet --fp16
//!
//! # List instruction-set tiers and registered kernels
//! packrt tiers
//! ```

mod commands;

use clap::{Parser, Subcommand};
use commands::ExecArgs;

#[derive(Parser)]
#[command(
    name = "packrt",
    about = "Packed-tensor CNN inference runtime",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file; CLI flags override its values.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a random input through the net and extract one blob.
    Run {
        #[command(flatten)]
        exec: ExecArgs,

        /// Input blob to seed (defaults to the model's first input).
        #[arg(short, long)]
        input: Option<String>,

        /// Input shape as `w[,h[,c]]` or `w,h,d,c` (defaults to the declared shape).
        #[arg(short = 's', long)]
        input_shape: Option<String>,

        /// Blob to extract (defaults to the model's first output).
        #[arg(short, long)]
        output: Option<String>,

        /// Seed for the random input.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Print per-layer timings and kernels.
        #[arg(long)]
        layers: bool,
    },

    /// Time extraction across instruction-set tiers and layouts.
    Benchmark {
        #[command(flatten)]
        exec: ExecArgs,

        /// Input shape as `w[,h[,c]]` (defaults to the declared shape).
        #[arg(short = 's', long)]
        input_shape: Option<String>,

        /// Timed extractions per configuration.
        #[arg(short = 'n', long, default_value_t = 10)]
        iterations: usize,
    },

    /// Inspect a model: layers, blobs, weights and selected kernels.
    Inspect {
        #[command(flatten)]
        exec: ExecArgs,
    },

    /// List instruction-set tiers and the kernels registered for each.
    Tiers,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            exec,
            input,
            input_shape,
            output,
            seed,
            layers,
        } => commands::run::execute(
            commands::resolve_config(config, &exec)?,
            commands::run::RunOptions {
                input,
                input_shape,
                output,
                seed,
                show_layers: layers,
            },
        ),
        Commands::Benchmark {
            exec,
            input_shape,
            iterations,
        } => commands::benchmark::execute(commands::resolve_config(config, &exec)?, input_shape, iterations),
        Commands::Inspect { exec } => commands::inspect::execute(commands::resolve_config(config, &exec)?),
        Commands::Tiers => commands::tiers::execute(),
    }
}
