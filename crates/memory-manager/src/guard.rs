// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII owner of an aligned storage block.
//!
//! A [`BufferGuard`] is what every allocator hands out. Its backing store is
//! a run of 64-byte aligned [`Block`]s, so any lane width up to 512 bits can
//! be loaded from the start of the buffer. Dropping the guard gives the
//! blocks back to the allocator that produced them, which either parks them
//! in a bucket for reuse or frees them.

use crate::pool::PoolInner;
use crate::MemoryError;
use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::sync::Arc;

/// Bytes per storage block, and the strongest alignment a guard can promise.
pub const MAX_ALIGN: usize = 64;

/// One cache line of storage. Only ever viewed through `bytemuck` casts.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
pub(crate) struct Block([u8; MAX_ALIGN]);

// SAFETY: `Block` is a plain byte array with no padding (size == align == 64).
unsafe impl Zeroable for Block {}
unsafe impl Pod for Block {}

impl Block {
    pub(crate) fn run(n: usize) -> Vec<Block> {
        vec![Block::zeroed(); n]
    }
}

/// An allocated, zero-initialised buffer.
///
/// The guard exposes exactly `size_bytes` bytes even when the underlying
/// block run is larger (pooled buffers are rounded up to their size class).
///
/// # Example
/// ```
/// use memory_manager::{Allocator, PoolAllocator};
///
/// let pool = PoolAllocator::unbounded();
/// let mut buf = pool.allocate(16, 16).unwrap();
/// buf.as_typed_mut::<f32>()[3] = 1.5;
/// assert_eq!(buf.as_typed::<f32>(), &[0.0, 0.0, 0.0, 1.5]);
/// drop(buf); // parked in the pool's 4 KiB bucket
/// ```
pub struct BufferGuard {
    blocks: Vec<Block>,
    size_bytes: usize,
    align: usize,
    home: Arc<PoolInner>,
}

impl BufferGuard {
    pub(crate) fn new(blocks: Vec<Block>, size_bytes: usize, align: usize, home: Arc<PoolInner>) -> Self {
        debug_assert!(blocks.len() * MAX_ALIGN >= size_bytes);
        Self {
            blocks,
            size_bytes,
            align,
            home,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &bytemuck::cast_slice::<Block, u8>(&self.blocks)[..self.size_bytes]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<Block, u8>(&mut self.blocks)[..self.size_bytes]
    }

    /// Views the buffer as a slice of `T`.
    ///
    /// # Panics
    /// Panics if `size_bytes` is not a multiple of `size_of::<T>()`.
    pub fn as_typed<T: Pod>(&self) -> &[T] {
        bytemuck::cast_slice(self.as_slice())
    }

    /// Mutable counterpart of [`as_typed`](Self::as_typed).
    ///
    /// # Panics
    /// Panics if `size_bytes` is not a multiple of `size_of::<T>()`.
    pub fn as_typed_mut<T: Pod>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(self.as_mut_slice())
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Alignment that was requested for this buffer.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Address of the first byte, for identity checks.
    pub fn as_ptr(&self) -> *const u8 {
        self.blocks.as_ptr().cast()
    }

    /// Name of the allocator that owns this buffer.
    pub fn allocator_name(&self) -> &'static str {
        self.home.label()
    }

    /// Copies the buffer into a fresh one drawn from the same allocator.
    ///
    /// # Errors
    /// Propagates the allocator's failure (e.g. budget exhausted).
    pub fn try_clone(&self) -> Result<BufferGuard, MemoryError> {
        let mut copy = self.home.acquire(self.size_bytes, self.align)?;
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        Ok(copy)
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        let blocks = std::mem::take(&mut self.blocks);
        self.home.release(blocks, self.size_bytes, self.align);
    }
}

impl fmt::Debug for BufferGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferGuard")
            .field("size_bytes", &self.size_bytes)
            .field("align", &self.align)
            .field("allocator", &self.home.label())
            .finish()
    }
}
