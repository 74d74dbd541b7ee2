// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `packrt tiers` command: what this binary can run on this CPU.

use operators::{default_threads, describe_kernels, Tier};

pub fn execute() -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              packrt · Instruction Tiers             ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Tiers ──────────────────────────────────────────────────
    println!("  {:<8} {:>6} {:>10} {:>10}", "Tier", "Lanes", "Compiled", "Detected");
    println!("  {}", "-".repeat(38));
    for tier in Tier::ALL {
        println!(
            "  {:<8} {:>6} {:>10} {:>10}",
            tier.as_str(),
            tier.width(),
            yes_no(tier.compiled_in()),
            yes_no(tier.detected()),
        );
    }
    println!();
    println!(
        "  Usable (widest first): {}",
        Tier::available().iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!("  Default threads:       {}", default_threads());
    println!();

    // ── Kernels ────────────────────────────────────────────────
    println!("  Registered kernels:");
    for line in describe_kernels() {
        println!("   {line}");
    }
    println!();

    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
