// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Border padding for ranks 1 to 4.
//!
//! Padding moves whole elements as bytes, so one routine serves every
//! dtype and packing. A packed input keeps its packing when the margins
//! on the packed axis are whole lane groups:
//!
//! ```text
//!   rank 1  left/right % pack == 0, constant fill
//!   rank 2  top/bottom % pack == 0, constant fill
//!   rank 3  front/behind % pack == 0, no channel margin unless constant
//!   rank 4  constant fill
//! ```
//!
//! Anything else is unpacked to elempack 1 first. Channel (rank 3) and
//! depth (rank 4) margins are always filled, whatever the mode.

use crate::operator::{single_input, Capabilities, Operator};
use crate::parallel::for_each_group;
use crate::{ExecOptions, OpError};
use memory_manager::Allocator;
use model_ir::geometry::{PadMode, PadParams};
use model_ir::{LayerDef, OpKind, WeightStore};
use tensor_core::{convert_packing, DType, Shape, Tensor};

/// Padding layer.
#[derive(Debug)]
pub struct Padding {
    name: String,
    params: PadParams,
    /// Fill value per logical output channel.
    per_channel: Option<Vec<f32>>,
}

impl Padding {
    pub fn new(layer: &LayerDef) -> Result<Self, OpError> {
        Ok(Self {
            name: layer.name.clone(),
            params: PadParams::from_params(&layer.params)?,
            per_channel: None,
        })
    }

    pub fn params(&self) -> &PadParams {
        &self.params
    }

    /// Whether `src` can be padded without leaving its packing.
    fn keeps_packing(&self, src: &Tensor) -> bool {
        let p = &self.params;
        let pack = src.elempack();
        let constant = p.mode == PadMode::Constant;
        match src.dims() {
            1 => constant && p.left % pack == 0 && p.right % pack == 0,
            2 => constant && p.top % pack == 0 && p.bottom % pack == 0,
            3 => p.front % pack == 0 && p.behind % pack == 0 && (constant || p.front + p.behind == 0),
            _ => constant,
        }
    }

    /// Margins in stored units for a tensor of `rank` and `pack`.
    fn stored_margins(&self, rank: usize, pack: usize) -> Margins {
        let p = &self.params;
        let mut m = Margins {
            left: p.left,
            right: p.right,
            top: p.top,
            bottom: p.bottom,
            front: p.front,
            behind: p.behind,
        };
        match rank {
            1 => {
                m.left /= pack;
                m.right /= pack;
                m.top = 0;
                m.bottom = 0;
                m.front = 0;
                m.behind = 0;
            }
            2 => {
                m.top /= pack;
                m.bottom /= pack;
                m.front = 0;
                m.behind = 0;
            }
            3 => {
                m.front /= pack;
                m.behind /= pack;
            }
            _ => {}
        }
        m
    }

    /// Encoded fill element for each output channel group.
    fn fill_patterns(&self, dtype: DType, pack: usize, out_groups: usize, rank: usize) -> Result<Vec<u8>, OpError> {
        let per_channel = match (&self.per_channel, rank) {
            (Some(values), 3 | 4) => Some(values.as_slice()),
            _ => None,
        };
        let channels = out_groups * pack;
        if let Some(values) = per_channel {
            if values.len() < channels {
                return Err(OpError::InvalidParam(format!(
                    "layer '{}': per_channel_pad has {} values for {channels} output channels",
                    self.name,
                    values.len()
                )));
            }
        }
        let lane = dtype.size_bytes();
        let mut bytes = vec![0u8; channels * lane];
        for (i, out) in bytes.chunks_exact_mut(lane).enumerate() {
            let value = per_channel.map(|v| v[i]).unwrap_or(self.params.value);
            dtype.encode(value, out);
        }
        Ok(bytes)
    }
}

impl Operator for Padding {
    fn kind(&self) -> OpKind {
        OpKind::Padding
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            one_blob_only: true,
            support_inplace: false,
            support_packing: true,
            support_fp16_storage: true,
            support_bf16_storage: true,
        }
    }

    fn load_model(&mut self, weights: &WeightStore) -> Result<(), OpError> {
        if let Some(w) = weights.layer_weight(&self.name, "per_channel_pad") {
            self.per_channel = Some(w.as_f32().to_vec());
        }
        Ok(())
    }

    fn preferred_elempack(&self, input: &Tensor, _opt: &ExecOptions) -> usize {
        input.elempack()
    }

    fn forward(&self, inputs: &[Tensor], opt: &ExecOptions) -> Result<Vec<Tensor>, OpError> {
        let src = single_input(inputs, &self.name)?;
        if self.params.is_identity() || src.is_empty() {
            return Ok(vec![src.clone()]);
        }

        let src = if src.elempack() == 1 || self.keeps_packing(src) {
            src.clone()
        } else {
            tracing::debug!(
                "{}: margins do not align with elempack {}, padding unpacked",
                self.name,
                src.elempack()
            );
            convert_packing(src, 1, opt.workspace_alloc())?
        };

        let margins = self.stored_margins(src.dims(), src.elempack());
        let out_groups = match src.dims() {
            3 => src.c() + margins.front + margins.behind,
            _ => src.c(),
        };
        let patterns = self.fill_patterns(src.dtype(), src.elempack(), out_groups, src.dims())?;
        let out = pad_elements(&src, margins, self.params.mode, &patterns, opt.blob_alloc(), opt.num_threads)?;
        Ok(vec![out])
    }

    fn selected_backend(&self) -> String {
        "scalar:bytes".to_string()
    }
}

// ── Element padder ─────────────────────────────────────────────────

/// Margins in stored elements. `front`/`behind` count channel groups for
/// rank 3 and depth slices for rank 4.
#[derive(Debug, Clone, Copy, Default)]
struct Margins {
    left: usize,
    right: usize,
    top: usize,
    bottom: usize,
    front: usize,
    behind: usize,
}

/// Source index for output position `o` along an axis of length `n` with
/// `before` elements of leading margin. `None` means fill.
fn source_index(o: usize, before: usize, n: usize, mode: PadMode) -> Option<usize> {
    let i = o as isize - before as isize;
    let n = n as isize;
    if (0..n).contains(&i) {
        return Some(i as usize);
    }
    match mode {
        PadMode::Constant => None,
        PadMode::Replicate => Some(i.clamp(0, n - 1) as usize),
        PadMode::Reflect => {
            let r = if i < 0 { -i } else { 2 * (n - 1) - i };
            Some(r as usize)
        }
    }
}

/// Index along a fill-only axis.
fn fill_axis(o: usize, before: usize, n: usize) -> Option<usize> {
    source_index(o, before, n, PadMode::Constant)
}

fn pad_elements(
    src: &Tensor,
    m: Margins,
    mode: PadMode,
    patterns: &[u8],
    allocator: Option<&dyn Allocator>,
    num_threads: usize,
) -> Result<Tensor, OpError> {
    let s = src.shape();
    let (w, h, d, c) = (s.w(), s.h(), s.d(), s.c());
    if mode == PadMode::Reflect && (m.left.max(m.right) >= w || m.top.max(m.bottom) >= h) {
        return Err(OpError::Shape(format!(
            "reflect margins must be smaller than the padded extent ({w}x{h})"
        )));
    }

    let rank = s.rank();
    let out_w = w + m.left + m.right;
    let out_h = h + m.top + m.bottom;
    let out_shape = match rank {
        1 => Shape::d1(out_w),
        2 => Shape::d2(out_w, out_h),
        3 => Shape::d3(out_w, out_h, c + m.front + m.behind),
        _ => Shape::d4(out_w, out_h, d + m.front + m.behind, c),
    };
    let mut out = Tensor::create(out_shape, src.dtype(), src.elempack(), allocator)?;

    let es = src.elemsize();
    let out_d = out_shape.d();
    let row_bytes = out_w * es;
    let in_group = w * h * d * es;
    let src_bytes = src.as_bytes();

    for_each_group(out.unique_bytes_mut()?, out_h * out_d * row_bytes, num_threads, |q, dst| {
        let pattern = &patterns[q * es..(q + 1) * es];
        let src_q = if rank == 3 { fill_axis(q, m.front, c) } else { Some(q) };
        for z in 0..out_d {
            let src_z = if rank == 4 { fill_axis(z, m.front, d) } else { Some(z) };
            for y in 0..out_h {
                let row = &mut dst[(z * out_h + y) * row_bytes..][..row_bytes];
                let src_row = match (src_q, src_z, source_index(y, m.top, h, mode)) {
                    (Some(sq), Some(sz), Some(sy)) => &src_bytes[sq * in_group + (sz * h + sy) * w * es..][..w * es],
                    _ => {
                        for el in row.chunks_exact_mut(es) {
                            el.copy_from_slice(pattern);
                        }
                        continue;
                    }
                };
                row[m.left * es..(m.left + w) * es].copy_from_slice(src_row);
                for x in (0..m.left).chain(m.left + w..out_w) {
                    let el = &mut row[x * es..(x + 1) * es];
                    match source_index(x, m.left, w, mode) {
                        Some(sx) => el.copy_from_slice(&src_row[sx * es..(sx + 1) * es]),
                        None => el.copy_from_slice(pattern),
                    }
                }
            }
        }
    });
    Ok(out)
}

/// Constant spatial padding of a rank-3 tensor in any packing, drawn from
/// the workspace allocator. Used by convolution.
pub(crate) fn pad_constant(
    src: &Tensor,
    (left, right, top, bottom): (usize, usize, usize, usize),
    value: f32,
    opt: &ExecOptions,
) -> Result<Tensor, OpError> {
    let margins = Margins {
        left,
        right,
        top,
        bottom,
        ..Default::default()
    };
    let lane = src.dtype().size_bytes();
    let mut element = vec![0u8; src.elemsize()];
    for out in element.chunks_exact_mut(lane) {
        src.dtype().encode(value, out);
    }
    let patterns = element.repeat(src.c());
    pad_elements(src, margins, PadMode::Constant, &patterns, opt.workspace_alloc(), opt.num_threads)
}
