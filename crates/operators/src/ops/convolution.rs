// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! 2-D convolution over rank-3 tensors.
//!
//! # Kernel Family
//!
//! | key (in → out) | tier     | kernel        |
//! |----------------|----------|---------------|
//! | 1 → 1          | scalar   | `reference`   |
//! | any → N        | each     | `packed_to_N` |
//!
//! Packed kernels consume any input packing and produce `N` output
//! channels per element, `N` being the lane width of the tier. Weights are
//! repacked once in `create_pipeline` so that the inner loop streams them:
//!
//! ```text
//!   raw     [outch][inch][kh * kw]
//!   packed  [outch / N][inch / in_pack][kh * kw][in_pack][N]
//! ```
//!
//! Spatial padding runs through the padding kernel first, so the window
//! loop never tests bounds.

use crate::activation::Activation;
use crate::dispatch::{DispatchTable, KernelEntry, KernelKey, ANY_PACK};
use crate::lanes::Lanes;
use crate::operator::{single_input, Capabilities, Operator};
use crate::ops::{pad_constant, packed_name, unpack_f32};
use crate::parallel::for_each_group;
use crate::{pick_elempack, ExecOptions, OpError, Tier};
use model_ir::geometry::ConvParams;
use model_ir::{LayerDef, OpKind, WeightStore};
use std::sync::OnceLock;
use tensor_core::{DType, Shape, Tensor};

/// Everything a convolution kernel reads for one forward call.
pub(crate) struct ConvJob<'a> {
    /// Padded input, `in_groups` channel groups of `in_cstep` elements.
    pub input: &'a [f32],
    pub in_w: usize,
    pub in_cstep: usize,
    pub in_groups: usize,
    pub in_pack: usize,
    pub out_w: usize,
    pub out_h: usize,
    pub weights: &'a [f32],
    pub bias: Option<&'a [f32]>,
    /// Element offset of each kernel tap from the window origin.
    pub space_ofs: &'a [usize],
    pub stride_w: usize,
    pub stride_h: usize,
    pub activation: Activation,
}

/// Computes output channel group `p` into `out` (`out_w * out_h` elements).
pub(crate) type ConvKernel = unsafe fn(&ConvJob<'_>, usize, &mut [f32]);

/// Elempack 1 in and out, raw weight layout.
unsafe fn conv_reference(job: &ConvJob<'_>, p: usize, out: &mut [f32]) {
    let maxk = job.space_ofs.len();
    let kernel = &job.weights[p * job.in_groups * maxk..(p + 1) * job.in_groups * maxk];
    let bias = job.bias.map(|b| b[p]).unwrap_or(0.0);
    for i in 0..job.out_h {
        for j in 0..job.out_w {
            let origin = i * job.stride_h * job.in_w + j * job.stride_w;
            let mut sum = bias;
            for q in 0..job.in_groups {
                let src = &job.input[q * job.in_cstep + origin..];
                let taps = &kernel[q * maxk..(q + 1) * maxk];
                for (&ofs, &wt) in job.space_ofs.iter().zip(taps) {
                    sum += src[ofs] * wt;
                }
            }
            out[i * job.out_w + j] = job.activation.apply(sum);
        }
    }
}

#[inline(always)]
unsafe fn conv_body<L: Lanes>(job: &ConvJob<'_>, p: usize, out: &mut [f32]) {
    let n = L::N;
    let in_pack = job.in_pack;
    let group_weights = job.in_groups * job.space_ofs.len() * in_pack * n;
    let kernel = job.weights.as_ptr().add(p * group_weights);
    let bias = match job.bias {
        Some(b) => L::load(b.as_ptr().add(p * n)),
        None => L::zero(),
    };
    let input = job.input.as_ptr();
    let in_group = job.in_cstep * in_pack;
    let mut outp = out.as_mut_ptr();

    for i in 0..job.out_h {
        for j in 0..job.out_w {
            let origin = (i * job.stride_h * job.in_w + j * job.stride_w) * in_pack;
            let mut sum = bias;
            let mut kptr = kernel;
            for q in 0..job.in_groups {
                let src = input.add(q * in_group + origin);
                for &ofs in job.space_ofs {
                    let s = src.add(ofs * in_pack);
                    for l in 0..in_pack {
                        sum = L::fmadd(L::splat(*s.add(l)), L::load(kptr), sum);
                        kptr = kptr.add(n);
                    }
                }
            }
            job.activation.apply_lanes(sum).store(outp);
            outp = outp.add(n);
        }
    }
}

tier_entry_points!(ConvKernel, conv_body(job: &ConvJob<'_>, p: usize, out: &mut [f32]));

static CONV_TABLE: OnceLock<DispatchTable<ConvKernel>> = OnceLock::new();

pub(crate) fn conv_table() -> &'static DispatchTable<ConvKernel> {
    CONV_TABLE.get_or_init(|| {
        let mut table: DispatchTable<ConvKernel> = DispatchTable::new(OpKind::Convolution);
        table.register(KernelKey::new(1, 1, DType::F32), Tier::Scalar, "reference", conv_reference);
        for (tier, lanes, kernel) in entry::lane_kernels() {
            table.register(KernelKey::new(ANY_PACK, lanes, DType::F32), tier, packed_name(lanes), kernel);
        }
        table
    })
}

fn reference_entry() -> KernelEntry<ConvKernel> {
    KernelEntry {
        key: KernelKey::new(1, 1, DType::F32),
        tier: Tier::Scalar,
        name: "reference",
        kernel: conv_reference,
    }
}

/// Reorders weights indexed by `weight(out_channel, in_channel, tap)` into
/// `[outch / out_pack][inch / in_pack][maxk][in_pack][out_pack]`.
pub(crate) fn repack_weights(
    outch: usize,
    inch: usize,
    maxk: usize,
    in_pack: usize,
    out_pack: usize,
    weight: impl Fn(usize, usize, usize) -> f32,
) -> Vec<f32> {
    let mut packed = Vec::with_capacity(outch * inch * maxk);
    for p in 0..outch / out_pack {
        for q in 0..inch / in_pack {
            for k in 0..maxk {
                for l in 0..in_pack {
                    for o in 0..out_pack {
                        packed.push(weight(p * out_pack + o, q * in_pack + l, k));
                    }
                }
            }
        }
    }
    packed
}

/// Convolution layer.
#[derive(Debug)]
pub struct Convolution {
    name: String,
    geo: ConvParams,
    act: Activation,
    inch: usize,
    weight: Option<Tensor>,
    bias: Option<Tensor>,
    packed_weight: Option<Tensor>,
    in_pack: usize,
    out_pack: usize,
    kernel: Option<KernelEntry<ConvKernel>>,
}

impl Convolution {
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

    fn tap_offsets(&self, in_w: usize) -> Vec<usize> {
        let g = &self.geo;
        (0..g.kernel_h)
            .flat_map(|y| (0..g.kernel_w).map(move |x| y * g.dilation_h * in_w + x * g.dilation_w))
            .collect()
    }
}

impl Operator for Convolution {
    fn kind(&self) -> OpKind {
        OpKind::Convolution
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
        if weight.dims.len() == 4 && (weight.dims[0] != g.num_output || weight.dims[2] != g.kernel_h || weight.dims[3] != g.kernel_w) {
            return Err(OpError::InvalidParam(format!(
                "layer '{}': weight extents {:?} do not match [{}, _, {}, {}]",
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
        let entry = match conv_table().select(&key, &Tier::for_options(opt)) {
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

        self.packed_weight = Some(if self.in_pack == 1 && self.out_pack == 1 {
            raw.clone()
        } else {
            let w = raw.as_f32_slice();
            let inch = self.inch;
            let packed = repack_weights(outch, inch, maxk, self.in_pack, self.out_pack, |o, i, k| {
                w[(o * inch + i) * maxk + k]
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
        let (out_w, out_h) = g.conv_output(input.w(), input.h()).ok_or_else(|| {
            OpError::Shape(format!(
                "layer '{}': {}x{} input is smaller than the {}x{} window",
                self.name,
                input.w(),
                input.h(),
                g.kernel_extent_w(),
                g.kernel_extent_h()
            ))
        })?;
        let input = if g.has_padding() {
            pad_constant(&input, (g.pad_left, g.pad_right, g.pad_top, g.pad_bottom), g.pad_value, opt)?
        } else {
            input
        };

        let mut out = Tensor::create_3d(out_w, out_h, g.num_output / out_pack, DType::F32, out_pack, opt.blob_alloc())?;
        let space_ofs = self.tap_offsets(input.w());
        let job = ConvJob {
            input: input.as_f32_slice(),
            in_w: input.w(),
            in_cstep: input.cstep(),
            in_groups: input.c(),
            in_pack: input.elempack(),
            out_w,
            out_h,
            weights: weights.as_f32_slice(),
            bias: self.bias.as_ref().map(Tensor::as_f32_slice),
            space_ofs: &space_ofs,
            stride_w: g.stride_w,
            stride_h: g.stride_h,
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
