// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Activations fused into convolution kernels.

use crate::lanes::Lanes;
use crate::OpError;

/// Activation applied to each output lane before it is stored.
///
/// Ids follow the model format: 0 none, 1 relu, 2 leaky relu (`[slope]`),
/// 3 clip (`[min, max]`), 4 sigmoid, 5 hardswish (`[alpha, beta]`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    Identity,
    ReLU,
    LeakyReLU { slope: f32 },
    Clip { min: f32, max: f32 },
    Sigmoid,
    HardSwish { alpha: f32, beta: f32 },
}

impl Activation {
    pub fn from_params(activation_type: i32, params: &[f32]) -> Result<Self, OpError> {
        let act = match activation_type {
            0 => Activation::Identity,
            1 => Activation::ReLU,
            2 => Activation::LeakyReLU {
                slope: params.first().copied().unwrap_or(0.0),
            },
            3 => match params {
                [min, max, ..] if min <= max => Activation::Clip { min: *min, max: *max },
                _ => {
                    return Err(OpError::InvalidParam(format!(
                        "clip activation needs [min, max] with min <= max, got {params:?}"
                    )))
                }
            },
            4 => Activation::Sigmoid,
            5 => Activation::HardSwish {
                alpha: params.first().copied().unwrap_or(1.0 / 6.0),
                beta: params.get(1).copied().unwrap_or(0.5),
            },
            other => return Err(OpError::InvalidParam(format!("unknown activation type {other}"))),
        };
        Ok(act)
    }

    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::ReLU => x.max(0.0),
            Activation::LeakyReLU { slope } => {
                if x < 0.0 {
                    x * slope
                } else {
                    x
                }
            }
            Activation::Clip { min, max } => x.max(min).min(max),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::HardSwish { alpha, beta } => x * (x * alpha + beta).clamp(0.0, 1.0),
        }
    }

    /// Lane-wise [`apply`](Self::apply).
    ///
    /// # Safety
    /// Same contract as the [`Lanes`] implementation.
    #[inline(always)]
    pub(crate) unsafe fn apply_lanes<L: Lanes>(self, v: L) -> L {
        match self {
            Activation::Identity => v,
            Activation::ReLU => L::max(v, L::zero()),
            Activation::LeakyReLU { slope } => {
                let pos = L::max(v, L::zero());
                let neg = L::min(v, L::zero());
                L::fmadd(neg, L::splat(slope), pos)
            }
            Activation::Clip { min, max } => L::min(L::max(v, L::splat(min)), L::splat(max)),
            Activation::HardSwish { alpha, beta } => {
                let gate = L::fmadd(v, L::splat(alpha), L::splat(beta));
                let gate = L::min(L::max(gate, L::zero()), L::splat(1.0));
                L::mul(v, gate)
            }
            Activation::Sigmoid => {
                let mut spill = [0.0f32; 16];
                v.store(spill.as_mut_ptr());
                for x in &mut spill[..L::N] {
                    *x = self.apply(*x);
                }
                L::load(spill.as_ptr())
            }
        }
    }
}
