// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! Aligned, pooled storage for packed tensors.
//!
//! # Key Components
//!
//! - [`Allocator`]: the trait every tensor allocation goes through. The
//!   runtime installs one for blob storage and one for operator scratch.
//! - [`PoolAllocator`]: keeps released buffers in `(size class, alignment)`
//!   buckets behind a lock and serves repeat shapes from them. An optional
//!   [`MemoryBudget`] turns over-allocation into an error instead of an abort.
//! - [`SystemAllocator`]: no reuse; the fallback when no allocator is named.
//! - [`BufferGuard`]: an RAII handle on a 64-byte aligned, zeroed block.
//!   Dropping it returns the block to whichever allocator produced it.
//! - [`AllocationStats`]: hit/miss, OOM and peak counters.
//!
//! # Ownership Model
//!
//! ```text
//! Allocator::allocate(size, align)
//!       │
//!       ▼
//!   BufferGuard  ◄─── owns Vec<Block>, holds Arc<PoolInner>
//!       │
//!       │  drop()
//!       ▼
//!   PoolInner::release() ──► bucket (pool) │ free (system)
//! ```
//!
//! # Example
//! ```
//! use memory_manager::{Allocator, MemoryBudget, PoolAllocator};
//!
//! let pool = PoolAllocator::new(MemoryBudget::from_mb(1));
//! let a = pool.allocate(3 * 64 * 4, 64).unwrap();
//! assert_eq!(pool.allocated_bytes(), 768);
//! drop(a);
//! assert_eq!(pool.allocated_bytes(), 0);
//! assert_eq!(pool.parked_buffers(), 1);
//! ```

mod budget;
mod error;
mod guard;
pub mod pool;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::{BufferGuard, MAX_ALIGN};
pub use pool::{Allocator, PoolAllocator, SystemAllocator};
pub use stats::AllocationStats;

/// Shared allocator handle as stored in execution options.
pub type SharedAllocator = std::sync::Arc<dyn Allocator>;
