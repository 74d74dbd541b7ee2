// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Lane-group conversion between packing widths.
//!
//! [`convert_packing`] regroups the packed axis of a tensor. Conceptually
//! every scalar has a logical index `i` along the packed axis and a
//! position `s` inside it; in a tensor with pack `p` that scalar lives at
//!
//! ```text
//! element ((i / p) * inner + s), lane (i % p)
//! ```
//!
//! so conversion is a strided gather that touches each lane exactly once.
//! Lanes are moved as raw bytes, which makes the conversion exact for
//! every storage type and a bijection between any two valid widths.

use crate::tensor::is_valid_elempack;
use crate::{Tensor, TensorError};
use memory_manager::Allocator;

/// Repacks `src` to `out_elempack` lanes per element.
///
/// Returns a shallow clone when the width is unchanged or `src` is empty.
///
/// # Errors
/// - [`TensorError::InvalidElempack`] for widths outside `{1, 4, 8, 16}`.
/// - [`TensorError::Packing`] if the logical packed-axis length is not a
///   multiple of `out_elempack`.
/// - [`TensorError::Allocation`] if the destination cannot be allocated.
///
/// # Examples
/// ```
/// use tensor_core::{convert_packing, Shape, Tensor};
///
/// let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
/// // Two pixels, four channels.
/// let planar = Tensor::from_f32(Shape::d3(2, 1, 4), &values).unwrap();
/// let packed = convert_packing(&planar, 4, None).unwrap();
/// assert_eq!(packed.as_f32_slice(), &[0.0, 2.0, 4.0, 6.0, 1.0, 3.0, 5.0, 7.0]);
/// ```
pub fn convert_packing(
    src: &Tensor,
    out_elempack: usize,
    allocator: Option<&dyn Allocator>,
) -> Result<Tensor, TensorError> {
    if !is_valid_elempack(out_elempack) {
        return Err(TensorError::InvalidElempack(out_elempack));
    }
    let in_elempack = src.elempack();
    if src.is_empty() || in_elempack == out_elempack {
        return Ok(src.clone());
    }

    let logical = src.logical_shape();
    let axis_len = logical.packed_axis_len();
    if axis_len % out_elempack != 0 {
        return Err(TensorError::Packing {
            shape: logical,
            from: in_elempack,
            to: out_elempack,
            len: axis_len,
        });
    }

    let mut dst = Tensor::create(
        logical.with_packed_axis(axis_len / out_elempack),
        src.dtype(),
        out_elempack,
        allocator,
    )?;

    let inner = logical.inner_len();
    let lane = src.dtype().size_bytes();
    let src_bytes = src.as_bytes();
    let dst_bytes = dst.unique_bytes_mut()?;

    for group in 0..axis_len / out_elempack {
        for s in 0..inner {
            let dst_elem = (group * inner + s) * out_elempack;
            for l in 0..out_elempack {
                let i = group * out_elempack + l;
                let src_lane = ((i / in_elempack) * inner + s) * in_elempack + i % in_elempack;
                let to = (dst_elem + l) * lane;
                let from = src_lane * lane;
                dst_bytes[to..to + lane].copy_from_slice(&src_bytes[from..from + lane]);
            }
        }
    }

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Shape};
    use proptest::prelude::*;

    const PACKS: [usize; 4] = [1, 4, 8, 16];

    fn ramp(shape: Shape, dtype: DType) -> Tensor {
        let mut t = Tensor::create(shape, dtype, 1, None).unwrap();
        let lane = dtype.size_bytes();
        for (i, b) in t.bytes_mut().unwrap().iter_mut().enumerate() {
            // Distinct per byte and per lane.
            *b = (i.wrapping_mul(31) ^ (i / lane)) as u8;
        }
        t
    }

    #[test]
    fn test_rank2_packs_rows() {
        // 2 columns, 4 rows: packed axis is h.
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let t = Tensor::from_f32(Shape::d2(2, 4), &values).unwrap();
        let p = convert_packing(&t, 4, None).unwrap();
        assert_eq!(p.shape(), Shape::d2(2, 1));
        assert_eq!(p.as_f32_slice(), &[0.0, 2.0, 4.0, 6.0, 1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_rank1_packs_width() {
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let t = Tensor::from_f32(Shape::d1(16), &values).unwrap();
        let p = convert_packing(&t, 8, None).unwrap();
        assert_eq!(p.shape(), Shape::d1(2));
        // Rank 1 has no inner extent, so storage order is unchanged.
        assert_eq!(p.as_f32_slice(), values.as_slice());
    }

    #[test]
    fn test_pack4_to_pack8_matches_direct() {
        let t = ramp(Shape::d4(3, 2, 2, 16), DType::F32);
        let via4 = convert_packing(&convert_packing(&t, 4, None).unwrap(), 8, None).unwrap();
        let direct = convert_packing(&t, 8, None).unwrap();
        assert_eq!(via4.as_bytes(), direct.as_bytes());
    }

    #[test]
    fn test_same_pack_is_shallow() {
        let t = ramp(Shape::d3(4, 4, 8), DType::F32);
        let same = convert_packing(&t, 1, None).unwrap();
        assert!(same.shares_buffer_with(&t));
    }

    #[test]
    fn test_indivisible_axis_rejected() {
        let t = ramp(Shape::d3(4, 4, 6), DType::F32);
        let err = convert_packing(&t, 4, None).unwrap_err();
        assert!(matches!(err, TensorError::Packing { len: 6, to: 4, .. }));
        assert!(matches!(
            convert_packing(&t, 2, None),
            Err(TensorError::InvalidElempack(2))
        ));
    }

    #[test]
    fn test_half_precision_lanes_move_intact() {
        let t = ramp(Shape::d3(5, 3, 16), DType::F16);
        let p = convert_packing(&t, 16, None).unwrap();
        assert_eq!(p.dtype(), DType::F16);
        assert_eq!(p.elemsize(), 32);
        let back = convert_packing(&p, 1, None).unwrap();
        assert_eq!(back.as_bytes(), t.as_bytes());
    }

    fn shape_strategy() -> impl Strategy<Value = Shape> {
        // Packed axis is a multiple of 16 so every width divides it.
        let axis = (1usize..=3).prop_map(|g| g * 16);
        (1usize..=4, 1usize..=5, 1usize..=4, 1usize..=3, axis).prop_map(|(rank, w, h, d, a)| match rank {
            1 => Shape::d1(a),
            2 => Shape::d2(w, a),
            3 => Shape::d3(w, h, a),
            _ => Shape::d4(w, h, d, a),
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip_is_exact(
            shape in shape_strategy(),
            p1 in prop::sample::select(PACKS.to_vec()),
            p2 in prop::sample::select(PACKS.to_vec()),
            dtype in prop::sample::select(vec![DType::F32, DType::F16, DType::I8]),
        ) {
            let base = ramp(shape, dtype);
            let a = convert_packing(&base, p1, None).unwrap();
            let b = convert_packing(&a, p2, None).unwrap();
            let back = convert_packing(&b, p1, None).unwrap();
            prop_assert_eq!(back.as_bytes(), a.as_bytes());
            prop_assert_eq!(b.logical_shape(), shape);
            prop_assert_eq!(b.size_bytes(), base.size_bytes());
        }
    }
}
