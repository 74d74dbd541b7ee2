// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Storage-type conversion.

use crate::{DType, Tensor, TensorError};
use memory_manager::Allocator;

/// Converts every lane of `src` to `to`, keeping shape and packing.
///
/// Same-type requests return a shallow clone. Narrowing to f16/bf16 rounds
/// to nearest; narrowing to i8 rounds and saturates to `[-127, 127]`.
///
/// # Examples
/// ```
/// use tensor_core::{cast, DType, Shape, Tensor};
/// let t = Tensor::from_f32(Shape::d1(3), &[0.5, -1.0, 300.0]).unwrap();
/// let h = cast(&t, DType::F16, None).unwrap();
/// assert_eq!(h.size_bytes(), 6);
/// let q = cast(&t, DType::I8, None).unwrap();
/// assert_eq!(q.to_f32_vec(), vec![1.0, -1.0, 127.0]);
/// ```
pub fn cast(src: &Tensor, to: DType, allocator: Option<&dyn Allocator>) -> Result<Tensor, TensorError> {
    let from = src.dtype();
    if from == to || src.is_empty() {
        return Ok(src.clone());
    }
    let mut dst = Tensor::create(src.shape(), to, src.elempack(), allocator)?;
    let (src_lane, dst_lane) = (from.size_bytes(), to.size_bytes());
    let out = dst.unique_bytes_mut()?;
    for (a, b) in src
        .as_bytes()
        .chunks_exact(src_lane)
        .zip(out.chunks_exact_mut(dst_lane))
    {
        to.encode(from.decode(a), b);
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{convert_packing, Shape};

    #[test]
    fn test_f16_round_trip_within_precision() {
        let values: Vec<f32> = (0..64).map(|i| (i as f32 - 32.0) * 0.37).collect();
        let t = Tensor::from_f32(Shape::d3(4, 4, 4), &values).unwrap();
        let back = cast(&cast(&t, DType::F16, None).unwrap(), DType::F32, None).unwrap();
        for (a, b) in values.iter().zip(back.as_f32_slice()) {
            assert!((a - b).abs() <= a.abs() * 1e-3 + 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_cast_keeps_packing() {
        let values: Vec<f32> = (0..32).map(|i| i as f32).collect();
        let t = Tensor::from_f32(Shape::d3(2, 2, 8), &values).unwrap();
        let packed = convert_packing(&t, 8, None).unwrap();
        let b = cast(&packed, DType::BF16, None).unwrap();
        assert_eq!(b.elempack(), 8);
        assert_eq!(b.elemsize(), 16);
        assert_eq!(b.to_f32_vec(), packed.to_f32_vec());
    }

    #[test]
    fn test_same_dtype_is_shallow() {
        let t = Tensor::from_f32(Shape::d1(4), &[1.0; 4]).unwrap();
        assert!(cast(&t, DType::F32, None).unwrap().shares_buffer_with(&t));
    }
}
