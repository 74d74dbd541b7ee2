// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise reduction over two or more inputs of one shape.

use crate::dispatch::{DispatchTable, KernelEntry, KernelKey, ANY_PACK};
use crate::lanes::Lanes;
use crate::operator::{Capabilities, Operator};
use crate::ops::unpack_f32;
use crate::{ExecOptions, OpError, Tier};
use model_ir::{LayerDef, OpKind};
use std::sync::OnceLock;
use tensor_core::{DType, Tensor};

/// Reduction applied between inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EltOp {
    Prod,
    Sum,
    Max,
}

impl EltOp {
    fn from_id(id: i32) -> Result<Self, OpError> {
        match id {
            0 => Ok(EltOp::Prod),
            1 => Ok(EltOp::Sum),
            2 => Ok(EltOp::Max),
            other => Err(OpError::InvalidParam(format!("eltwise op_type {other} is not 0, 1 or 2"))),
        }
    }
}

/// Folds `src` into `acc`: `acc * src`, `acc + coeff * src` or `max(acc, src)`.
pub(crate) type EltwiseKernel = unsafe fn(&mut [f32], &[f32], EltOp, f32);

#[inline(always)]
unsafe fn eltwise_body<L: Lanes>(acc: &mut [f32], src: &[f32], op: EltOp, coeff: f32) {
    let n = acc.len().min(src.len());
    let vec_end = n - n % L::N;
    let (ap, sp) = (acc.as_mut_ptr(), src.as_ptr());
    let c = L::splat(coeff);
    let mut i = 0;
    while i < vec_end {
        let a = L::load(ap.add(i));
        let s = L::load(sp.add(i));
        let r = match op {
            EltOp::Prod => L::mul(a, s),
            EltOp::Sum => L::fmadd(s, c, a),
            EltOp::Max => L::max(a, s),
        };
        r.store(ap.add(i));
        i += L::N;
    }
    for j in vec_end..n {
        acc[j] = match op {
            EltOp::Prod => acc[j] * src[j],
            EltOp::Sum => acc[j] + coeff * src[j],
            EltOp::Max => acc[j].max(src[j]),
        };
    }
}

tier_entry_points!(EltwiseKernel, eltwise_body(acc: &mut [f32], src: &[f32], op: EltOp, coeff: f32));

static ELTWISE_TABLE: OnceLock<DispatchTable<EltwiseKernel>> = OnceLock::new();

pub(crate) fn eltwise_table() -> &'static DispatchTable<EltwiseKernel> {
    ELTWISE_TABLE.get_or_init(|| {
        let mut table = DispatchTable::new(OpKind::Eltwise);
        for (tier, kernel) in entry::native_kernels() {
            table.register(KernelKey::new(ANY_PACK, ANY_PACK, DType::F32), tier, "fold", kernel);
        }
        table
    })
}

/// Eltwise layer (`op_type`, optional per-input `coeffs` for sums).
#[derive(Debug)]
pub struct Eltwise {
    name: String,
    op: EltOp,
    coeffs: Vec<f32>,
    kernel: Option<KernelEntry<EltwiseKernel>>,
}

impl Eltwise {
    pub fn new(layer: &LayerDef) -> Result<Self, OpError> {
        Ok(Self {
            name: layer.name.clone(),
            op: EltOp::from_id(layer.params.int("op_type", 0)?)?,
            coeffs: layer.params.floats("coeffs")?,
            kernel: None,
        })
    }

    pub fn op(&self) -> EltOp {
        self.op
    }

    fn coeff(&self, i: usize) -> f32 {
        if self.op == EltOp::Sum {
            self.coeffs.get(i).copied().unwrap_or(1.0)
        } else {
            1.0
        }
    }
}

impl Operator for Eltwise {
    fn kind(&self) -> OpKind {
        OpKind::Eltwise
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            support_packing: true,
            ..Default::default()
        }
    }

    fn create_pipeline(&mut self, opt: &ExecOptions) -> Result<(), OpError> {
        if !self.coeffs.is_empty() && self.op != EltOp::Sum {
            tracing::warn!("{}: coeffs only apply to sums and will be ignored", self.name);
        }
        let key = KernelKey::new(ANY_PACK, ANY_PACK, DType::F32);
        self.kernel = eltwise_table().select(&key, &Tier::for_options(opt)).copied();
        Ok(())
    }

    fn forward(&self, inputs: &[Tensor], opt: &ExecOptions) -> Result<Vec<Tensor>, OpError> {
        let first = inputs.first().ok_or_else(|| OpError::Shape(format!("layer '{}' has no inputs", self.name)))?;
        if inputs.iter().any(|t| t.logical_shape() != first.logical_shape()) {
            let shapes: Vec<String> = inputs.iter().map(|t| t.logical_shape().to_string()).collect();
            return Err(OpError::Shape(format!(
                "layer '{}': eltwise inputs differ in shape: {}",
                self.name,
                shapes.join(", ")
            )));
        }

        let uniform = inputs
            .iter()
            .all(|t| t.elempack() == first.elempack() && t.dtype() == DType::F32);
        let unpacked;
        let inputs = if uniform {
            inputs
        } else {
            tracing::debug!("{}: mixed packing or dtype, folding unpacked", self.name);
            unpacked = inputs
                .iter()
                .map(|t| unpack_f32(t, opt))
                .collect::<Result<Vec<_>, _>>()?;
            unpacked.as_slice()
        };

        let shape = inputs[0].shape();
        let elempack = inputs[0].elempack();
        let mut out = Tensor::create(shape, DType::F32, elempack, opt.blob_alloc())?;
        let acc = out.f32_mut()?;
        let rest = match self.op {
            // The zeroed buffer is the identity of a sum.
            EltOp::Sum => inputs,
            EltOp::Prod | EltOp::Max => {
                acc.copy_from_slice(inputs[0].as_f32_slice());
                &inputs[1..]
            }
        };
        let offset = inputs.len() - rest.len();
        for (i, t) in rest.iter().enumerate() {
            let coeff = self.coeff(i + offset);
            match self.kernel {
                // SAFETY: the entry's tier was detected when the pipeline was built.
                Some(entry) => unsafe { (entry.kernel)(acc, t.as_f32_slice(), self.op, coeff) },
                None => unsafe { entry::scalar1(acc, t.as_f32_slice(), self.op, coeff) },
            }
        }
        Ok(vec![out])
    }

    fn selected_backend(&self) -> String {
        self.kernel
            .map(|e| e.label())
            .unwrap_or_else(|| "scalar:fold".to_string())
    }
}
