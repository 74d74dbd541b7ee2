// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Rectified linear unit with optional negative slope.
//!
//! Elementwise, so the kernel walks the flat buffer and is indifferent to
//! packing. f32 runs on lanes; reduced-precision storage is decoded per lane.

use crate::activation::Activation;
use crate::dispatch::{DispatchTable, KernelEntry, KernelKey, ANY_PACK};
use crate::lanes::Lanes;
use crate::operator::{single_input, Capabilities, Operator};
use crate::{ExecOptions, OpError, Tier};
use model_ir::{LayerDef, OpKind};
use std::sync::OnceLock;
use tensor_core::{DType, Tensor};

/// `dst[i] = act(src[i])` for `i < n`. `src` and `dst` may be the same
/// pointer: each lane is loaded before it is stored.
pub(crate) type ReluKernel = unsafe fn(*const f32, *mut f32, usize, Activation);

#[inline(always)]
unsafe fn relu_body<L: Lanes>(sp: *const f32, dp: *mut f32, n: usize, act: Activation) {
    let vec_end = n - n % L::N;
    let mut i = 0;
    while i < vec_end {
        act.apply_lanes(L::load(sp.add(i))).store(dp.add(i));
        i += L::N;
    }
    for j in vec_end..n {
        *dp.add(j) = act.apply(*sp.add(j));
    }
}

tier_entry_points!(ReluKernel, relu_body(sp: *const f32, dp: *mut f32, n: usize, act: Activation));

static RELU_TABLE: OnceLock<DispatchTable<ReluKernel>> = OnceLock::new();

pub(crate) fn relu_table() -> &'static DispatchTable<ReluKernel> {
    RELU_TABLE.get_or_init(|| {
        let mut table = DispatchTable::new(OpKind::ReLU);
        for (tier, kernel) in entry::native_kernels() {
            table.register(KernelKey::new(ANY_PACK, ANY_PACK, DType::F32), tier, "flat", kernel);
        }
        table
    })
}

/// ReLU layer (`slope` param, default 0).
#[derive(Debug)]
pub struct ReLU {
    name: String,
    act: Activation,
    kernel: Option<KernelEntry<ReluKernel>>,
}

impl ReLU {
    pub fn new(layer: &LayerDef) -> Result<Self, OpError> {
        let slope = layer.params.float("slope", 0.0)?;
        let act = if slope == 0.0 {
            Activation::ReLU
        } else {
            Activation::LeakyReLU { slope }
        };
        Ok(Self {
            name: layer.name.clone(),
            act,
            kernel: None,
        })
    }

    fn forward_decoded(&self, src: &Tensor, opt: &ExecOptions) -> Result<Tensor, OpError> {
        let dtype = src.dtype();
        let lane = dtype.size_bytes();
        let mut out = Tensor::create_like(src, opt.blob_alloc())?;
        let dst = out.unique_bytes_mut()?;
        for (s, d) in src.as_bytes().chunks_exact(lane).zip(dst.chunks_exact_mut(lane)) {
            dtype.encode(self.act.apply(dtype.decode(s)), d);
        }
        Ok(out)
    }
}

impl Operator for ReLU {
    fn kind(&self) -> OpKind {
        OpKind::ReLU
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            one_blob_only: true,
            support_inplace: true,
            support_packing: true,
            support_fp16_storage: true,
            support_bf16_storage: true,
        }
    }

    fn create_pipeline(&mut self, opt: &ExecOptions) -> Result<(), OpError> {
        let key = KernelKey::new(ANY_PACK, ANY_PACK, DType::F32);
        self.kernel = relu_table().select(&key, &Tier::for_options(opt)).copied();
        Ok(())
    }

    fn preferred_elempack(&self, input: &Tensor, _opt: &ExecOptions) -> usize {
        input.elempack()
    }

    fn forward(&self, inputs: &[Tensor], opt: &ExecOptions) -> Result<Vec<Tensor>, OpError> {
        let src = single_input(inputs, &self.name)?;
        if src.is_empty() {
            return Ok(vec![src.clone()]);
        }
        let entry = match (src.dtype(), self.kernel) {
            (DType::F32, Some(entry)) => entry,
            _ => return Ok(vec![self.forward_decoded(src, opt)?]),
        };
        let mut out = Tensor::create_like(src, opt.blob_alloc())?;
        let src = src.as_f32_slice();
        let dst = out.f32_mut()?;
        // SAFETY: the entry's tier was detected when the pipeline was built;
        // both buffers hold `src.len()` floats.
        unsafe { (entry.kernel)(src.as_ptr(), dst.as_mut_ptr(), src.len().min(dst.len()), self.act) };
        Ok(vec![out])
    }

    fn forward_inplace(&self, blob: &mut Tensor, _opt: &ExecOptions) -> Result<(), OpError> {
        if blob.is_empty() {
            return Ok(());
        }
        match (blob.dtype(), self.kernel) {
            (DType::F32, Some(entry)) => {
                let data = blob.f32_mut()?;
                let p = data.as_mut_ptr();
                // SAFETY: as in `forward`; the kernel tolerates src == dst.
                unsafe { (entry.kernel)(p, p, data.len(), self.act) };
            }
            (dtype, _) => {
                let lane = dtype.size_bytes();
                for chunk in blob.unique_bytes_mut()?.chunks_exact_mut(lane) {
                    let v = self.act.apply(dtype.decode(chunk));
                    dtype.encode(v, chunk);
                }
            }
        }
        Ok(())
    }

    fn selected_backend(&self) -> String {
        self.kernel
            .map(|e| e.label())
            .unwrap_or_else(|| "scalar:decoded".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{assert_close, random_values};
    use model_ir::{ParamDict, ParamValue};
    use tensor_core::{cast, convert_packing, Shape};

    fn relu(slope: f32) -> ReLU {
        let layer = LayerDef {
            name: "relu".into(),
            kind: OpKind::ReLU,
            index: 0,
            inputs: vec![0],
            outputs: vec![1],
            params: ParamDict::new().with("slope", ParamValue::Float(slope)),
        };
        let mut op = ReLU::new(&layer).unwrap();
        op.create_pipeline(&ExecOptions::default()).unwrap();
        op
    }

    #[test]
    fn test_plain_and_leaky() {
        let x = Tensor::from_f32(Shape::d1(5), &[-2.0, -1.0, 0.0, 1.0, 2.0]).unwrap();
        let opt = ExecOptions::default();
        let out = relu(0.0).forward(&[x.clone()], &opt).unwrap();
        assert_eq!(out[0].as_f32_slice(), &[0.0, 0.0, 0.0, 1.0, 2.0]);
        let out = relu(0.1).forward(&[x], &opt).unwrap();
        assert_close(out[0].as_f32_slice(), &[-0.2, -0.1, 0.0, 1.0, 2.0], 1e-6);
    }

    #[test]
    fn test_packed_input_keeps_packing() {
        let values = random_values(5 * 3 * 16, 7);
        let plain = Tensor::from_f32(Shape::d3(5, 3, 16), &values).unwrap();
        let packed = convert_packing(&plain, 8, None).unwrap();
        let op = relu(0.2);
        let opt = ExecOptions::default();
        assert_eq!(op.preferred_elempack(&packed, &opt), 8);
        let out = op.forward(&[packed], &opt).unwrap().remove(0);
        assert_eq!(out.elempack(), 8);
        let out = convert_packing(&out, 1, None).unwrap();
        let expected: Vec<f32> = values.iter().map(|&v| if v < 0.0 { v * 0.2 } else { v }).collect();
        assert_close(out.as_f32_slice(), &expected, 1e-6);
    }

    #[test]
    fn test_bf16_storage() {
        let x = Tensor::from_f32(Shape::d1(3), &[-4.0, 0.5, 8.0]).unwrap();
        let x = cast(&x, DType::BF16, None).unwrap();
        let out = relu(0.0).forward(&[x], &ExecOptions::default()).unwrap().remove(0);
        assert_eq!(out.dtype(), DType::BF16);
        assert_eq!(out.to_f32_vec(), vec![0.0, 0.5, 8.0]);
    }

    #[test]
    fn test_every_tier_matches_scalar() {
        let src = random_values(101, 3);
        let act = Activation::LeakyReLU { slope: 0.05 };
        let expected: Vec<f32> = src.iter().map(|&v| act.apply(v)).collect();
        for entry in relu_table().entries() {
            if !entry.tier.detected() {
                continue;
            }
            let mut dst = vec![0.0; src.len()];
            unsafe { (entry.kernel)(src.as_ptr(), dst.as_mut_ptr(), src.len(), act) };
            assert_close(&dst, &expected, 1e-6);

            let mut same = src.clone();
            let p = same.as_mut_ptr();
            unsafe { (entry.kernel)(p, p, same.len(), act) };
            assert_close(&same, &expected, 1e-6);
        }
    }

    #[test]
    fn test_forward_inplace_overwrites_buffer() {
        let values = random_values(4 * 4 * 8, 11);
        let plain = Tensor::from_f32(Shape::d3(4, 4, 8), &values).unwrap();
        let mut packed = convert_packing(&plain, 4, None).unwrap();
        let before = packed.as_f32_slice().as_ptr();
        let op = relu(0.5);
        op.forward_inplace(&mut packed, &ExecOptions::default()).unwrap();
        assert_eq!(packed.as_f32_slice().as_ptr(), before);
        assert_eq!(packed.elempack(), 4);
        let out = convert_packing(&packed, 1, None).unwrap();
        let expected: Vec<f32> = values.iter().map(|&v| if v < 0.0 { v * 0.5 } else { v }).collect();
        assert_close(out.as_f32_slice(), &expected, 1e-6);
    }

    #[test]
    fn test_forward_inplace_fp16() {
        let x = Tensor::from_f32(Shape::d1(3), &[-2.0, 0.25, 3.0]).unwrap();
        let mut x = cast(&x, DType::F16, None).unwrap();
        relu(0.0).forward_inplace(&mut x, &ExecOptions::default()).unwrap();
        assert_eq!(x.dtype(), DType::F16);
        assert_eq!(x.to_f32_vec(), vec![0.0, 0.25, 3.0]);
    }

    #[test]
    fn test_forward_inplace_rejects_shared_buffer() {
        let x = Tensor::from_f32(Shape::d1(2), &[-1.0, 1.0]).unwrap();
        let mut alias = x.clone();
        assert!(relu(0.0).forward_inplace(&mut alias, &ExecOptions::default()).is_err());
        assert_eq!(x.as_f32_slice(), &[-1.0, 1.0]);
    }
}
