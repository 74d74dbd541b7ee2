// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Instruction-set tiers.
//!
//! A tier is usable when it is both compiled into this binary and detected
//! on the running CPU. Detection runs once per process.
//!
//! ```text
//!   declared order:  Scalar  Sse2  Neon  Avx2  Avx512  Gpu
//!   lane width:        1      4     4     8     16     -
//!   preference:      widest width first, ties by declared order,
//!                    scalar last
//! ```

use crate::ExecOptions;
use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use std::sync::{Once, OnceLock};

/// One instruction-set tier, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Portable code; handles every packing.
    Scalar,
    /// x86-64 128-bit vectors.
    Sse2,
    /// AArch64 128-bit vectors.
    Neon,
    /// x86-64 256-bit vectors with FMA.
    Avx2,
    /// x86-64 512-bit vectors (`avx512` feature).
    Avx512,
    /// Compute device. No device backend ships with this crate.
    Gpu,
}

static AVAILABLE: OnceLock<Vec<Tier>> = OnceLock::new();
static GPU_FALLBACK: Once = Once::new();

impl Tier {
    pub const ALL: [Tier; 6] = [Tier::Scalar, Tier::Sse2, Tier::Neon, Tier::Avx2, Tier::Avx512, Tier::Gpu];

    /// f32 lanes per vector register.
    pub fn width(self) -> usize {
        match self {
            Tier::Scalar => 1,
            Tier::Sse2 | Tier::Neon => 4,
            Tier::Avx2 => 8,
            Tier::Avx512 => 16,
            Tier::Gpu => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Scalar => "scalar",
            Tier::Sse2 => "sse2",
            Tier::Neon => "neon",
            Tier::Avx2 => "avx2",
            Tier::Avx512 => "avx512",
            Tier::Gpu => "gpu",
        }
    }

    /// Whether kernels for this tier are part of the build.
    pub fn compiled_in(self) -> bool {
        match self {
            Tier::Scalar => true,
            Tier::Sse2 | Tier::Avx2 => cfg!(target_arch = "x86_64"),
            Tier::Avx512 => cfg!(all(target_arch = "x86_64", feature = "avx512")),
            Tier::Neon => cfg!(target_arch = "aarch64"),
            Tier::Gpu => false,
        }
    }

    /// Whether the running CPU supports this tier.
    pub fn detected(self) -> bool {
        match self {
            Tier::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            Tier::Sse2 => std::arch::is_x86_feature_detected!("sse2"),
            #[cfg(target_arch = "x86_64")]
            Tier::Avx2 => {
                std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
            }
            #[cfg(target_arch = "x86_64")]
            Tier::Avx512 => std::arch::is_x86_feature_detected!("avx512f"),
            #[cfg(target_arch = "aarch64")]
            Tier::Neon => std::arch::is_aarch64_feature_detected!("neon"),
            _ => false,
        }
    }

    /// CPU tiers usable in this process, in preference order.
    pub fn available() -> &'static [Tier] {
        AVAILABLE.get_or_init(|| {
            let mut tiers: Vec<Tier> = Tier::ALL
                .into_iter()
                .filter(|t| *t != Tier::Gpu && t.compiled_in() && t.detected())
                .collect();
            sort_by_preference(&mut tiers);
            tracing::debug!("available tiers: {tiers:?}");
            tiers
        })
    }

    /// Tiers an operator may select under `opt`, in preference order.
    ///
    /// `max_tier` caps the lane width. A GPU request falls back to the CPU
    /// tiers with a one-time warning.
    pub fn for_options(opt: &ExecOptions) -> Vec<Tier> {
        if opt.use_vulkan_compute {
            GPU_FALLBACK.call_once(|| {
                tracing::warn!("GPU compute requested but no GPU device is available; using CPU tiers");
            });
        }
        let cap = opt.max_tier.map(Tier::width).unwrap_or(usize::MAX);
        Tier::available()
            .iter()
            .copied()
            .filter(|t| t.width() <= cap)
            .collect()
    }
}

/// Orders tiers widest first; equal widths keep declared order.
pub fn sort_by_preference(tiers: &mut [Tier]) {
    tiers.sort_by_key(|t| (Reverse(t.width()), *t));
}

/// Widest lane count among `tiers` that divides `len`, or 1.
///
/// Returns 1 when packing is disabled in `opt`.
pub fn pick_elempack(len: usize, opt: &ExecOptions) -> usize {
    if !opt.use_packing_layout {
        return 1;
    }
    Tier::for_options(opt)
        .iter()
        .map(|t| t.width())
        .find(|&w| w > 1 && len % w == 0)
        .unwrap_or(1)
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown tier '{s}'"))
    }
}
