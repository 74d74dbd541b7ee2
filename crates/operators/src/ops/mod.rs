// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Built-in operator kinds.
//!
//! Lane kernels are generic over [`Lanes`](crate::lanes::Lanes); the
//! `tier_entry_points!` macro stamps out one entry point per tier, each
//! compiled with that tier's `#[target_feature]` so the generic body is
//! inlined with the right instructions.

use crate::{ExecOptions, OpError};
use tensor_core::{cast, convert_packing, DType, Tensor};

/// Generates `entry::lane_kernels()` for a generic body
/// `fn body<L: Lanes>(args...)`.
///
/// Every compiled-in tier contributes its native width; the scalar tier
/// contributes widths 1, 4, 8 and 16 as portable fallbacks.
macro_rules! tier_entry_points {
    ($kernel:ty, $body:ident ( $($arg:ident : $ty:ty),* $(,)? )) => {
        pub(crate) mod entry {
            #![allow(unused_imports)]
            use super::*;
            use crate::lanes::*;
            use crate::Tier;

            pub(crate) unsafe fn scalar1($($arg: $ty),*) { $body::<ScalarLanes<1>>($($arg),*) }
            unsafe fn scalar4($($arg: $ty),*) { $body::<ScalarLanes<4>>($($arg),*) }
            unsafe fn scalar8($($arg: $ty),*) { $body::<ScalarLanes<8>>($($arg),*) }
            unsafe fn scalar16($($arg: $ty),*) { $body::<ScalarLanes<16>>($($arg),*) }

            #[cfg(target_arch = "x86_64")]
            #[target_feature(enable = "sse2")]
            unsafe fn sse2($($arg: $ty),*) { $body::<SseLanes>($($arg),*) }

            #[cfg(target_arch = "x86_64")]
            #[target_feature(enable = "avx2,fma")]
            unsafe fn avx2($($arg: $ty),*) { $body::<AvxLanes>($($arg),*) }

            #[cfg(all(target_arch = "x86_64", feature = "avx512"))]
            #[target_feature(enable = "avx512f")]
            unsafe fn avx512($($arg: $ty),*) { $body::<Avx512Lanes>($($arg),*) }

            #[cfg(target_arch = "aarch64")]
            #[target_feature(enable = "neon")]
            unsafe fn neon($($arg: $ty),*) { $body::<NeonLanes>($($arg),*) }

            /// `(tier, lanes, kernel)` for every compiled-in entry point.
            pub(crate) fn lane_kernels() -> Vec<(Tier, usize, $kernel)> {
                #[allow(unused_mut)]
                let mut kernels: Vec<(Tier, usize, $kernel)> = vec![
                    (Tier::Scalar, 1, scalar1 as $kernel),
                    (Tier::Scalar, 4, scalar4 as $kernel),
                    (Tier::Scalar, 8, scalar8 as $kernel),
                    (Tier::Scalar, 16, scalar16 as $kernel),
                ];
                #[cfg(target_arch = "x86_64")]
                {
                    kernels.push((Tier::Sse2, 4, sse2 as $kernel));
                    kernels.push((Tier::Avx2, 8, avx2 as $kernel));
                }
                #[cfg(all(target_arch = "x86_64", feature = "avx512"))]
                kernels.push((Tier::Avx512, 16, avx512 as $kernel));
                #[cfg(target_arch = "aarch64")]
                kernels.push((Tier::Neon, 4, neon as $kernel));
                kernels
            }

            /// One entry per tier at its native width.
            #[allow(dead_code)]
            pub(crate) fn native_kernels() -> Vec<(Tier, $kernel)> {
                lane_kernels()
                    .into_iter()
                    .filter(|(tier, lanes, _)| *lanes == tier.width())
                    .map(|(tier, _, kernel)| (tier, kernel))
                    .collect()
            }
        }
    };
}

mod convolution;
mod deconvolution;
mod eltwise;
mod input;
mod padding;
mod relu;
mod split;

pub use convolution::Convolution;
pub use deconvolution::Deconvolution;
pub use eltwise::{EltOp, Eltwise};
pub use input::Input;
pub use padding::Padding;
pub use relu::ReLU;
pub use split::Split;

pub(crate) use padding::pad_constant;

/// Reference-path view of `t`: elempack 1, f32, in workspace memory.
pub(crate) fn unpack_f32(t: &Tensor, opt: &ExecOptions) -> Result<Tensor, OpError> {
    let unpacked = convert_packing(t, 1, opt.workspace_alloc())?;
    Ok(cast(&unpacked, DType::F32, opt.workspace_alloc())?)
}

/// Table name of a kernel producing `lanes` output channels per element.
pub(crate) fn packed_name(lanes: usize) -> &'static str {
    match lanes {
        1 => "packed_to_1",
        4 => "packed_to_4",
        8 => "packed_to_8",
        _ => "packed_to_16",
    }
}

/// Kernel tables of every lane-dispatched operator, for inspection.
pub fn describe_kernels() -> Vec<String> {
    let mut lines = convolution::conv_table().describe();
    lines.extend(deconvolution::deconv_table().describe());
    lines.extend(relu::relu_table().describe());
    lines.extend(eltwise::eltwise_table().describe());
    lines
}
