// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Transposed 2-D convolution, computed as a gather.
//!
//! Each output position collects the input taps that would have scattered
//! into it. Output `(oy, ox)` in the uncropped frame receives input
//! `(sy, sx)` through tap `(y, x)` when
//!
//! ```text
//!   oy = sy * stride_h + y * dilation_h
//!   ox = sx * stride_w + x * dilation_w
//! ```
//!
//! so a tap contributes only if `oy - y * dilation_h` is a non-negative
//! multiple of the stride that lands inside the input. Pads crop the
//! uncropped frame; the crop is folded into the gather offsets instead of
//! materialising the full output.
//!
//! Weights arrive as `[inch][outch][kh][kw]` and are repacked into the
//! convolution layout, so both operators share one weight format after
//! `create_pipeline`.

use crate::activation::Activation;
use crate::dispatch::{DispatchTable, KernelEntry, KernelKey, ANY_PACK};
use crate::lanes::Lanes;
use crate::operator::{single_input, Capabilities, Operator};
use crate::ops::convolution::repack_weights;
use crate::ops::{packed_name, unpack_f32};
use crate::parallel::for_each_group;
use crate::{pick_elempack, ExecOptions, OpError, Tier};
use model_ir::geometry::ConvParams;
use model_ir::{LayerDef, OpKind, WeightStore};
use std::sync::OnceLock;
use tensor_core::{DType, Shape, Tensor};

pub(crate) struct DeconvJob<'a> {
    pub input: &'a [f32],
    pub in_w: usize,
    pub in_h: usize,
    pub in_cstep: usize,
    pub in_groups: usize,
    pub in_pack: usize,
    pub out_w: usize,
    pub out_h: usize,
    pub weights: &'a [f32],
    pub bias: Option<&'a [f32]>,
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
    pub pad_left: usize,
    pub pad_top: usize,
    pub activation: Activation,
}

impl DeconvJob<'_> {
    /// Input row (or column) feeding cropped output `o` through tap `k`.
    #[inline(always)]
    fn source(o: usize, pad: usize, k: usize, dilation: usize, stride: usize, len: usize) -> Option<usize> {
        let s = (o + pad).checked_sub(k * dilation)?;
        if s % stride != 0 {
            return None;
        }
        let s = s / stride;
        (s < len).then_some(s)
    }

    fn source_y(&self, i: usize, y: usize) -> Option<usize> {
        Self::source(i, self.pad_top, y, self.dilation_h, self.stride_h, self.in_h)
    }

    fn source_x(&self, j: usize, x: usize) -> Option<usize> {
        Self::source(j, self.pad_left, x, self.dilation_w, self.stride_w, self.in_w)
    }
}

/// Computes output channel group `p` into `out` (`out_w * out_h` elements).
pub(crate) type DeconvKernel = unsafe fn(&DeconvJob<'_>, usize, &mut [f32]);

/// Elempack 1 in and out, raw `[inch][outch][k]` weights.
unsafe fn deconv_reference(job: &DeconvJob<'_>, p: usize, out: &mut [f32]) {
    let maxk = job.kernel_w * job.kernel_h;
    let outch = job.weights.len() / (job.in_groups * maxk);
    let bias = job.bias.map(|b| b[p]).unwrap_or(0.0);
    for i in 0..job.out_h {
        for j in 0..job.out_w {
            let mut sum = bias;
            for q in 0..job.in_groups {
                let channel = &job.input[q * job.in_cstep..];
                let taps = &job.weights[(q * outch + p) * maxk..];
                for y in 0..job.kernel_h {
                    let Some(sy) = job.source_y(i, y) else { continue };
                    for x in 0..job.kernel_w {
                        let Some(sx) = job.source_x(j, x) else { continue };
                        sum += channel[sy * job.in_w + sx] * taps[y * job.kernel_w + x];
                    }
                }
            }
            out[i * job.out_w + j] = job.activation.apply(sum);
        }
    }
}

#[inline(always)]
unsafe fn deconv_body<L: Lanes>(job: &DeconvJob<'_>, p: usize, out: &mut [f32]) {
    let n = L::N;
    let in_pack = job.in_pack;
    let maxk = job.kernel_w * job.kernel_h;
    let kernel = job.weights.as_ptr().add(p * job.in_groups * maxk * in_pack * n);
    let bias = match job.bias {
        Some(b) => L::load(b.as_ptr().add(p * n)),
        None => L::zero(),
    };
    let input = job.input.as_ptr();
    let mut outp = out.as_mut_ptr();

    for i in 0..job.out_h {
        for j in 0..job.out_w {
            let mut sum = bias;
            for q in 0..job.in_groups {
                let channel = input.add(q * job.in_cstep * in_pack);
                let kq = kernel.add(q * maxk * in_pack * n);
                for y in 0..job.kernel_h {
                    let Some(sy) = job.source_y(i, y) else { continue };
                    for x in 0..job.kernel_w {
                        let Some(sx) = job.source_x(j, x) else { continue };
                        let s = channel.add((sy * job.in_w + sx) * in_pack);
                        let mut kptr = kq.add((y * job.kernel_w + x) * in_pack * n);
                        for l in 0..in_pack {
                            sum = L::fmadd(L::splat(*s.add(l)), L::load(kptr), sum);
                            kptr = kptr.add(n);
                        }
                    }
                }
            }
            job.activation.apply_lanes(sum).store(outp);
            outp = outp.add(n);
        }
    }
}

tier_entry_points!(DeconvKernel, deconv_body(job: &DeconvJob<'_>, p: usize, out: &mut [f32]));

static DECONV_TABLE: OnceLock<DispatchTable<DeconvKernel>> = OnceLock::new();

pub(crate) fn deconv_table() -> &'static DispatchTable<DeconvKernel> {
    DECONV_TABLE.get_or_init(|| {
        let mut table: DispatchTable<DeconvKernel> = DispatchTable::new(OpKind::Deconvolution);
        table.register(KernelKey::new(1, 1, DType::F32), Tier::Scalar, "reference", deconv_reference);
        for (tier, lanes, kernel) in entry::lane_kernels() {
            table.register(KernelKey::new(ANY_PACK, lanes, DType::F32), tier, packed_name(lanes), kernel);
        }
        table
    })
}

fn reference_entry() -> KernelEntry<DeconvKernel> {
    KernelEntry {
        key: KernelKey::new(1, 1, DType::F32),
        tier: Tier::Scalar,
        name: "reference",
        kernel: deconv_reference,
    }
}

/// Deconvolution layer.
#[derive(Debug)]
pub struct Deconvolution {
    name: String,
    geo: ConvParams,
    act: Activation,
    inch: usize,
    weight: Option<Tensor>,
    bias: Option<Tensor>,
    packed_weight: Option<Tensor>,
    in_pack: usize,
    out_pack: usize,
    kernel: Option<KernelEntry<DeconvKernel>>,
}

impl Deconvolution {
    pub fn new(layer: &LayerDef) -> Result<Self, OpError> {
        let geo = ConvParams::from_params(&layer.params)?;
        let act = Activation::from_params(geo.activation_type, &geo.activation_params)?;
        Ok(Self {
            name: layer.name.clone(),
            geo,
            act,
            inch: 0,
            weight: None,
            bias: None,
            packed_weight: None,
            in_pack: 1,
            out_pack: 1,
            kernel: None,
        })
    }

    pub fn params(&self) -> &ConvParams {
        &self.geo
    }

    fn missing(&self, slot: &str) -> OpError {
        OpError::MissingWeight {
            layer: self.name.clone(),
            slot: slot.to_string(),
        }
    }
}

impl Operator for Deconvolution {
    fn kind(&self) -> OpKind {
        OpKind::Deconvolution
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            one_blob_only: true,
            support_packing: true,
            ..Default::default()
        }
    }

    fn load_model(&mut self, weights: &WeightStore) -> Result<(), OpError> {
        let g = &self.geo;
        let weight = weights.layer_weight(&self.name, "weight").ok_or_else(|| self.missing("weight"))?;
        let per_input = g.num_output * g.maxk();
        let count = weight.num_elements();
        if count == 0 || count % per_input != 0 {
            return Err(OpError::InvalidParam(format!(
                "layer '{}': weight has {count} values, not a multiple of num_output * kernel taps ({per_input})",
                self.name
            )));
        }
        if weight.dims.len() == 4 && (weight.dims[1] != g.num_output || weight.dims[2] != g.kernel_h || weight.dims[3] != g.kernel_w) {
            return Err(OpError::InvalidParam(format!(
                "layer '{}': weight extents {:?} do not match [_, {}, {}, {}]",
                self.name, weight.dims, g.num_output, g.kernel_h, g.kernel_w
            )));
        }
        self.inch = count / per_input;
        self.weight = Some(weight.data.clone());

        if g.bias_term {
            let bias = weights.layer_weight(&self.name, "bias").ok_or_else(|| self.missing("bias"))?;
            if bias.num_elements() != g.num_output {
                return Err(OpError::InvalidParam(format!(
                    "layer '{}': bias has {} values for {} outputs",
                    self.name,
                    bias.num_elements(),
                    g.num_output
                )));
            }
            self.bias = Some(bias.data.clone());
        }
        Ok(())
    }

    fn create_pipeline(&mut self, opt: &ExecOptions) -> Result<(), OpError> {
        let raw = self.weight.as_ref().ok_or_else(|| self.missing("weight"))?;
        let outch = self.geo.num_output;
        let maxk = self.geo.maxk();

        let key = KernelKey::new(pick_elempack(self.inch, opt), pick_elempack(outch, opt), DType::F32);
        let entry = match deconv_table().select(&key, &Tier::for_options(opt)) {
            Some(e) => {
                self.in_pack = key.in_elempack;
                self.out_pack = key.out_elempack;
                *e
            }
            None => {
                tracing::warn!("{}: no kernel for {:?}, using the reference kernel", self.name, key);
                self.in_pack = 1;
                self.out_pack = 1;
                reference_entry()
            }
        };

        // The reference kernel reads the raw layout; packed kernels read the
        // convolution layout even at pack 1.
        self.packed_weight = Some(if entry.name == "reference" {
            raw.clone()
        } else {
            let w = raw.as_f32_slice();
            let packed = repack_weights(outch, self.inch, maxk, self.in_pack, self.out_pack, |o, i, k| {
                w[(i * outch + o) * maxk + k]
            });
            Tensor::from_f32(Shape::d1(packed.len()), &packed)?
        });
        tracing::debug!(
            "{}: {} (in_pack={}, out_pack={})",
            self.name,
            entry.label(),
            self.in_pack,
            self.out_pack
        );
        self.kernel = Some(entry);
        Ok(())
    }

    fn preferred_elempack(&self, _input: &Tensor, _opt: &ExecOptions) -> usize {
        self.in_pack
    }

    fn forward(&self, inputs: &[Tensor], opt: &ExecOptions) -> Result<Vec<Tensor>, OpError> {
        let src = single_input(inputs, &self.name)?;
        let (Some(entry), Some(raw), Some(packed)) = (self.kernel, &self.weight, &self.packed_weight) else {
            return Err(OpError::Unsupported(format!("layer '{}' has no pipeline", self.name)));
        };
        if src.dims() != 3 || src.logical_shape().c() != self.inch {
            return Err(OpError::Shape(format!(
                "layer '{}' expects [w, h, {}], got {}",
                self.name,
                self.inch,
                src.logical_shape()
            )));
        }

        let fast = src.dtype() == DType::F32 && src.elempack() == self.in_pack;
        let (input, entry, weights, out_pack) = if fast {
            (src.clone(), entry, packed, self.out_pack)
        } else {
            tracing::debug!(
                "{}: got {} elempack {}, falling back to the reference kernel",
                self.name,
                src.dtype(),
                src.elempack()
            );
            (unpack_f32(src, opt)?, reference_entry(), raw, 1)
        };

        let g = &self.geo;
        let (out_w, out_h) = g.deconv_output(input.w(), input.h()).ok_or_else(|| {
            OpError::Shape(format!(
                "layer '{}': pads crop the whole {}x{} deconvolution output",
                self.name,
                input.w(),
                input.h()
            ))
        })?;

        let mut out = Tensor::create_3d(out_w, out_h, g.num_output / out_pack, DType::F32, out_pack, opt.blob_alloc())?;
        let job = DeconvJob {
            input: input.as_f32_slice(),
            in_w: input.w(),
            in_h: input.h(),
            in_cstep: input.cstep(),
            in_groups: input.c(),
            in_pack: input.elempack(),
            out_w,
            out_h,
            weights: weights.as_f32_slice(),
            bias: self.bias.as_ref().map(Tensor::as_f32_slice),
            kernel_w: g.kernel_w,
            kernel_h: g.kernel_h,
            dilation_w: g.dilation_w,
            dilation_h: g.dilation_h,
            stride_w: g.stride_w,
            stride_h: g.stride_h,
            pad_left: g.pad_left,
            pad_top: g.pad_top,
            activation: self.act,
        };
        let kernel = entry.kernel;
        // SAFETY: the entry's tier was detected when the pipeline was built
        // and the job extents match the tensors it borrows.
        for_each_group(out.f32_mut()?, out_w * out_h * out_pack, opt.num_threads, |p, group| unsafe {
            kernel(&job, p, group)
        });
        Ok(vec![out])
    }

    fn selected_backend(&self) -> String {
        self.kernel
            .map(|e| e.label())
            .unwrap_or_else(|| "none".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{assert_close, random_values};
    use model_ir::{ParamDict, ParamValue};
    use tensor_core::convert_packing;

    fn layer(params: &[(&str, i32)]) -> LayerDef {
        let mut dict = ParamDict::new();
        for (k, v) in params {
            dict.set(k, ParamValue::Int(*v));
        }
        LayerDef {
            name: "deconv".into(),
            kind: OpKind::Deconvolution,
            index: 0,
            inputs: vec![0],
            outputs: vec![1],
            params: dict,
        }
    }

    fn build(params: &[(&str, i32)], inch: usize, opt: &ExecOptions) -> (Deconvolution, Vec<f32>, Vec<f32>) {
        let mut op = Deconvolution::new(&layer(params)).unwrap();
        let g = op.params().clone();
        let weight = random_values(inch * g.num_output * g.maxk(), 41);
        let bias = random_values(g.num_output, 42);
        let mut store = WeightStore::empty();
        store
            .insert("deconv.weight", vec![inch, g.num_output, g.kernel_h, g.kernel_w], &weight)
            .unwrap();
        store.insert("deconv.bias", vec![g.num_output], &bias).unwrap();
        op.load_model(&store).unwrap();
        op.create_pipeline(opt).unwrap();
        (op, weight, bias)
    }

    /// Scatters every input value through the kernel, then crops the pads.
    fn naive(x: &[f32], w: usize, h: usize, inch: usize, g: &ConvParams, weight: &[f32], bias: &[f32]) -> Vec<f32> {
        let (full_w, full_h) = g.deconv_full(w, h);
        let outch = g.num_output;
        let mut full = vec![0.0f32; outch * full_w * full_h];
        for o in 0..outch {
            for c in 0..inch {
                for sy in 0..h {
                    for sx in 0..w {
                        let v = x[(c * h + sy) * w + sx];
                        for ky in 0..g.kernel_h {
                            for kx in 0..g.kernel_w {
                                let oy = sy * g.stride_h + ky * g.dilation_h;
                                let ox = sx * g.stride_w + kx * g.dilation_w;
                                let wt = weight[((c * outch + o) * g.kernel_h + ky) * g.kernel_w + kx];
                                full[(o * full_h + oy) * full_w + ox] += v * wt;
                            }
                        }
                    }
                }
            }
        }
        let (out_w, out_h) = g.deconv_output(w, h).unwrap();
        let mut out = Vec::new();
        for o in 0..outch {
            for i in 0..out_h {
                for j in 0..out_w {
                    let b = if g.bias_term { bias[o] } else { 0.0 };
                    out.push(full[(o * full_h + i + g.pad_top) * full_w + j + g.pad_left] + b);
                }
            }
        }
        out
    }

    #[test]
    fn test_reference_matches_scatter() {
        let params = [
            ("num_output", 3),
            ("kernel_w", 3),
            ("kernel_h", 2),
            ("stride_w", 2),
            ("dilation_h", 2),
            ("pad_left", 1),
            ("pad_bottom", 0),
            ("output_pad_right", 1),
            ("bias_term", 1),
        ];
        let opt = ExecOptions {
            max_tier: Some(Tier::Scalar),
            ..Default::default()
        };
        let (op, weight, bias) = build(&params, 2, &opt);
        assert_eq!(op.selected_backend(), "scalar:reference");
        let x = random_values(4 * 3 * 2, 7);
        let input = Tensor::from_f32(Shape::d3(4, 3, 2), &x).unwrap();
        let out = op.forward(&[input], &opt).unwrap().remove(0);
        let (out_w, out_h) = op.params().deconv_output(4, 3).unwrap();
        assert_eq!((out.w(), out.h(), out.c()), (out_w, out_h, 3));
        assert_close(out.as_f32_slice(), &naive(&x, 4, 3, 2, op.params(), &weight, &bias), 1e-5);
    }

    #[test]
    fn test_packed_pipeline_matches_scatter() {
        let params = [("num_output", 8), ("kernel_w", 3), ("stride_w", 2), ("pad_left", 1), ("bias_term", 1)];
        let opt = ExecOptions::default();
        let (op, weight, bias) = build(&params, 8, &opt);
        let x = random_values(5 * 4 * 8, 8);
        let plain = Tensor::from_f32(Shape::d3(5, 4, 8), &x).unwrap();
        let packed = convert_packing(&plain, op.preferred_elempack(&plain, &opt), None).unwrap();
        let out = op.forward(&[packed], &opt).unwrap().remove(0);
        let out = convert_packing(&out, 1, None).unwrap();
        assert_close(out.as_f32_slice(), &naive(&x, 5, 4, 8, op.params(), &weight, &bias), 1e-4);
    }

    #[test]
    fn test_every_kernel_matches_reference() {
        let (inch, outch, w, h) = (8, 16, 4, 3);
        let (kw, kh, stride) = (3, 3, 2);
        let x = random_values(w * h * inch, 50);
        let weight = random_values(inch * outch * kw * kh, 51);
        let bias = random_values(outch, 52);
        let (out_w, out_h) = ((w - 1) * stride + kw - 2, (h - 1) * stride + kh - 2);
        let plain = Tensor::from_f32(Shape::d3(w, h, inch), &x).unwrap();

        let run = |kernel: DeconvKernel, in_pack: usize, out_pack: usize, weights: &[f32]| -> Vec<f32> {
            let input = convert_packing(&plain, in_pack, None).unwrap();
            let job = DeconvJob {
                input: input.as_f32_slice(),
                in_w: w,
                in_h: h,
                in_cstep: w * h,
                in_groups: inch / in_pack,
                in_pack,
                out_w,
                out_h,
                weights,
                bias: Some(bias.as_slice()),
                kernel_w: kw,
                kernel_h: kh,
                dilation_w: 1,
                dilation_h: 1,
                stride_w: stride,
                stride_h: stride,
                pad_left: 1,
                pad_top: 1,
                activation: Activation::Clip { min: -0.5, max: 0.5 },
            };
            let mut out = Tensor::create_3d(out_w, out_h, outch / out_pack, DType::F32, out_pack, None).unwrap();
            let buf = out.f32_mut().unwrap();
            for (p, group) in buf.chunks_mut(out_w * out_h * out_pack).enumerate() {
                unsafe { kernel(&job, p, group) };
            }
            convert_packing(&out, 1, None).unwrap().as_f32_slice().to_vec()
        };

        let expected = run(deconv_reference, 1, 1, &weight);
        for entry in deconv_table().entries() {
            if !entry.tier.detected() || entry.key.in_elempack != ANY_PACK {
                continue;
            }
            let out_pack = entry.key.out_elempack;
            for in_pack in [1, 4, 8] {
                let packed = repack_weights(outch, inch, kw * kh, in_pack, out_pack, |o, i, k| {
                    weight[(i * outch + o) * kw * kh + k]
                });
                assert_close(&run(entry.kernel, in_pack, out_pack, &packed), &expected, 1e-4);
            }
        }
    }

    #[test]
    fn test_crop_consumes_output() {
        let opt = ExecOptions::default();
        let (op, _, _) = build(&[("num_output", 1), ("kernel_w", 1), ("pad_left", 1)], 1, &opt);
        let input = Tensor::from_f32(Shape::d3(1, 1, 1), &[1.0]).unwrap();
        assert_eq!(op.forward(&[input], &opt).unwrap_err().status(), crate::STATUS_SHAPE);
    }

    #[test]
    fn test_weight_layout_checked() {
        let mut op = Deconvolution::new(&layer(&[("num_output", 4), ("kernel_w", 3)])).unwrap();
        let mut store = WeightStore::empty();
        store.insert("deconv.weight", vec![4, 2, 3, 3], &[0.0; 72]).unwrap();
        assert!(op.load_model(&store).is_err());
    }
}
