// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Packed tensor storage.
//!
//! # Layout
//!
//! A [`Tensor`] stores its packed axis in groups of `elempack` lanes. With
//! `elempack = 4` a rank-3 tensor of logical shape `[w, h, 8]` holds two
//! channel groups, each `w * h` elements of four interleaved lanes:
//!
//! ```text
//! group 0: (x0,y0)[c0 c1 c2 c3] (x1,y0)[c0 c1 c2 c3] ...
//! group 1: (x0,y0)[c4 c5 c6 c7] (x1,y0)[c4 c5 c6 c7] ...
//! ```
//!
//! `shape()` reports the stored extents (packed axis divided by
//! `elempack`), `logical_shape()` the scalar extents. One element is
//! `elemsize = dtype.size_bytes() * elempack` bytes and a channel group
//! spans `cstep = w * h * d` elements.
//!
//! # Sharing
//!
//! `clone()` is shallow: both handles point at the same buffer. Mutation
//! goes through [`bytes_mut`](Tensor::bytes_mut) and friends, which only
//! succeed for the unique owner; [`make_unique`](Tensor::make_unique) copies
//! a shared buffer first.

use crate::{DType, Shape, TensorError};
use bytemuck::Pod;
use memory_manager::{Allocator, BufferGuard, SystemAllocator, MAX_ALIGN};
use std::fmt;
use std::sync::Arc;

/// Returns `true` for the supported lane group widths.
pub fn is_valid_elempack(elempack: usize) -> bool {
    matches!(elempack, 1 | 4 | 8 | 16)
}

/// A packed, reference-counted tensor.
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    elempack: usize,
    dtype: DType,
    data: Option<Arc<BufferGuard>>,
}

impl Tensor {
    /// A tensor with no extents and no storage.
    pub fn empty() -> Self {
        Self {
            shape: Shape::empty(),
            elempack: 1,
            dtype: DType::F32,
            data: None,
        }
    }

    /// Allocates a zeroed tensor with stored extents `shape`.
    ///
    /// The packed axis of `shape` counts lane groups, not scalars. When
    /// `allocator` is `None` the process-wide [`SystemAllocator`] is used.
    /// An empty `shape` yields an empty tensor without allocating.
    ///
    /// # Errors
    /// - [`TensorError::InvalidElempack`] for widths outside `{1, 4, 8, 16}`.
    /// - [`TensorError::Allocation`] if the allocator fails.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DType, Shape, Tensor};
    ///
    /// // 16 logical channels stored as 4 groups of 4 lanes.
    /// let t = Tensor::create(Shape::d3(5, 5, 4), DType::F32, 4, None).unwrap();
    /// assert_eq!(t.logical_shape(), Shape::d3(5, 5, 16));
    /// assert_eq!(t.elemsize(), 16);
    /// assert_eq!(t.size_bytes(), 5 * 5 * 4 * 16);
    /// ```
    pub fn create(
        shape: Shape,
        dtype: DType,
        elempack: usize,
        allocator: Option<&dyn Allocator>,
    ) -> Result<Self, TensorError> {
        if !is_valid_elempack(elempack) {
            return Err(TensorError::InvalidElempack(elempack));
        }
        if shape.is_empty() {
            return Ok(Self::empty());
        }
        let allocator: &dyn Allocator = match allocator {
            Some(a) => a,
            None => SystemAllocator::global(),
        };
        let bytes = shape.num_elements() * dtype.size_bytes() * elempack;
        let buffer = allocator.allocate(bytes, MAX_ALIGN)?;
        Ok(Self {
            shape,
            elempack,
            dtype,
            data: Some(Arc::new(buffer)),
        })
    }

    pub fn create_1d(w: usize, dtype: DType, elempack: usize, allocator: Option<&dyn Allocator>) -> Result<Self, TensorError> {
        Self::create(Shape::d1(w), dtype, elempack, allocator)
    }

    pub fn create_2d(w: usize, h: usize, dtype: DType, elempack: usize, allocator: Option<&dyn Allocator>) -> Result<Self, TensorError> {
        Self::create(Shape::d2(w, h), dtype, elempack, allocator)
    }

    pub fn create_3d(w: usize, h: usize, c: usize, dtype: DType, elempack: usize, allocator: Option<&dyn Allocator>) -> Result<Self, TensorError> {
        Self::create(Shape::d3(w, h, c), dtype, elempack, allocator)
    }

    pub fn create_4d(
        w: usize,
        h: usize,
        d: usize,
        c: usize,
        dtype: DType,
        elempack: usize,
        allocator: Option<&dyn Allocator>,
    ) -> Result<Self, TensorError> {
        Self::create(Shape::d4(w, h, d, c), dtype, elempack, allocator)
    }

    /// Allocates a zeroed tensor with the same layout as `other`.
    pub fn create_like(other: &Tensor, allocator: Option<&dyn Allocator>) -> Result<Self, TensorError> {
        Self::create(other.shape, other.dtype, other.elempack, allocator)
    }

    /// Builds an unpacked f32 tensor from scalars in storage order.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{Shape, Tensor};
    /// let t = Tensor::from_f32(Shape::d2(3, 2), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    /// assert_eq!(t.as_f32_slice()[4], 5.0);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        Self::from_bytes(shape, DType::F32, 1, bytemuck::cast_slice(values), None)
    }

    /// Builds a tensor by copying `bytes`, which must match the layout exactly.
    pub fn from_bytes(
        shape: Shape,
        dtype: DType,
        elempack: usize,
        bytes: &[u8],
        allocator: Option<&dyn Allocator>,
    ) -> Result<Self, TensorError> {
        let expected = shape.num_elements() * dtype.size_bytes() * elempack;
        if bytes.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let mut t = Self::create(shape, dtype, elempack, allocator)?;
        t.unique_bytes_mut()?.copy_from_slice(bytes);
        Ok(t)
    }

    // ── Layout ──────────────────────────────────────────────────

    /// Stored extents (packed axis in lane groups).
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Scalar extents.
    pub fn logical_shape(&self) -> Shape {
        self.shape
            .with_packed_axis(self.shape.packed_axis_len() * self.elempack)
    }

    pub fn dims(&self) -> usize {
        self.shape.rank()
    }

    pub fn w(&self) -> usize {
        self.shape.w()
    }

    pub fn h(&self) -> usize {
        self.shape.h()
    }

    pub fn d(&self) -> usize {
        self.shape.d()
    }

    /// Stored channel groups.
    pub fn c(&self) -> usize {
        self.shape.c()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn elempack(&self) -> usize {
        self.elempack
    }

    /// Bytes per packed element.
    pub fn elemsize(&self) -> usize {
        self.dtype.size_bytes() * self.elempack
    }

    /// Packed elements per channel group.
    pub fn cstep(&self) -> usize {
        self.shape.w() * self.shape.h() * self.shape.d()
    }

    /// Packed elements in the whole tensor.
    pub fn total(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn size_bytes(&self) -> usize {
        self.total() * self.elemsize()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }

    // ── Storage ─────────────────────────────────────────────────

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_deref().map(BufferGuard::as_slice).unwrap_or(&[])
    }

    /// Views every lane as `T`.
    ///
    /// # Panics
    /// Panics if the byte size is not a multiple of `size_of::<T>()`.
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        bytemuck::cast_slice(self.as_bytes())
    }

    /// Views every lane as `f32`.
    ///
    /// # Panics
    /// Panics if `self.dtype() != DType::F32`.
    pub fn as_f32_slice(&self) -> &[f32] {
        assert_eq!(self.dtype, DType::F32, "as_f32_slice called on {} tensor", self.dtype);
        self.as_slice()
    }

    /// Bytes of channel group `q`.
    ///
    /// # Panics
    /// Panics if `q >= self.c()`.
    pub fn channel(&self, q: usize) -> &[u8] {
        assert!(q < self.c(), "channel {q} out of range ({} groups)", self.c());
        let stride = self.cstep() * self.elemsize();
        &self.as_bytes()[q * stride..(q + 1) * stride]
    }

    /// Lanes of channel group `q` as `T`.
    pub fn channel_as<T: Pod>(&self, q: usize) -> &[T] {
        bytemuck::cast_slice(self.channel(q))
    }

    /// Mutable bytes if this handle is the only owner.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        self.data
            .as_mut()
            .and_then(Arc::get_mut)
            .map(BufferGuard::as_mut_slice)
    }

    /// Mutable lanes as `T` if this handle is the only owner.
    pub fn data_mut<T: Pod>(&mut self) -> Option<&mut [T]> {
        self.bytes_mut().map(bytemuck::cast_slice_mut)
    }

    /// Like [`bytes_mut`](Self::bytes_mut), but reports why it failed.
    ///
    /// An empty tensor yields an empty slice.
    pub fn unique_bytes_mut(&mut self) -> Result<&mut [u8], TensorError> {
        let refs = self.ref_count();
        match self.data.as_mut() {
            None => Ok(&mut []),
            Some(buf) => match Arc::get_mut(buf) {
                Some(guard) => Ok(guard.as_mut_slice()),
                None => Err(TensorError::Shared { refs }),
            },
        }
    }

    /// Mutable f32 lanes of the unique owner.
    ///
    /// # Errors
    /// [`TensorError::DTypeMismatch`] for non-f32 tensors, [`TensorError::Shared`]
    /// if another handle references the buffer.
    pub fn f32_mut(&mut self) -> Result<&mut [f32], TensorError> {
        if self.dtype != DType::F32 {
            return Err(TensorError::DTypeMismatch {
                op: "f32_mut",
                expected: DType::F32,
                actual: self.dtype,
            });
        }
        Ok(bytemuck::cast_slice_mut(self.unique_bytes_mut()?))
    }

    /// Copies the buffer if it is shared, so later writes stay private.
    ///
    /// The copy is drawn from the allocator that owns the current buffer.
    pub fn make_unique(&mut self) -> Result<(), TensorError> {
        if let Some(buf) = self.data.as_mut() {
            if Arc::get_mut(buf).is_none() {
                let copy = buf.try_clone()?;
                *buf = Arc::new(copy);
            }
        }
        Ok(())
    }

    /// Number of handles sharing the buffer (0 when empty).
    pub fn ref_count(&self) -> usize {
        self.data.as_ref().map(Arc::strong_count).unwrap_or(0)
    }

    /// Returns `true` if both tensors point at the same buffer.
    pub fn shares_buffer_with(&self, other: &Tensor) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    // ── Fill / decode ───────────────────────────────────────────

    /// Writes `value` (encoded in the tensor's dtype) into every lane.
    ///
    /// # Errors
    /// [`TensorError::Shared`] if the buffer is shared.
    pub fn fill(&mut self, value: f32) -> Result<(), TensorError> {
        let lane = self.dtype.size_bytes();
        let mut pattern = [0u8; 4];
        self.dtype.encode(value, &mut pattern[..lane]);
        for dst in self.unique_bytes_mut()?.chunks_exact_mut(lane) {
            dst.copy_from_slice(&pattern[..lane]);
        }
        Ok(())
    }

    /// Writes a per-lane vector into every packed element.
    ///
    /// `lanes.len()` must equal `elempack`; lane `i` of every element
    /// receives `lanes[i]`.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DType, Tensor};
    /// let mut t = Tensor::create_1d(2, DType::F32, 4, None).unwrap();
    /// t.fill_lanes(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    /// assert_eq!(t.as_f32_slice(), &[1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0]);
    /// ```
    pub fn fill_lanes(&mut self, lanes: &[f32]) -> Result<(), TensorError> {
        if lanes.len() != self.elempack {
            return Err(TensorError::LaneCount {
                elempack: self.elempack,
                actual: lanes.len(),
            });
        }
        let lane = self.dtype.size_bytes();
        let mut pattern = vec![0u8; self.elemsize()];
        for (value, out) in lanes.iter().zip(pattern.chunks_exact_mut(lane)) {
            self.dtype.encode(*value, out);
        }
        let elemsize = pattern.len();
        for dst in self.unique_bytes_mut()?.chunks_exact_mut(elemsize) {
            dst.copy_from_slice(&pattern);
        }
        Ok(())
    }

    /// Decodes every lane to f32, in storage order.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let lane = self.dtype.size_bytes();
        self.as_bytes()
            .chunks_exact(lane)
            .map(|b| self.dtype.decode(b))
            .collect()
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape.to_vec())
            .field("dtype", &self.dtype)
            .field("elempack", &self.elempack)
            .field("refs", &self.ref_count())
            .finish()
    }
}
