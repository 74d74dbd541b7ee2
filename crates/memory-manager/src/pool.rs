// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocators for tensor storage.
//!
//! Two implementations of the [`Allocator`] trait share one engine
//! (`PoolInner`):
//!
//! - [`PoolAllocator`] keeps returned buffers in buckets keyed by
//!   `(size class, alignment)` and serves later requests from them. This is
//!   the allocator the runtime installs for blobs and scratch space, where
//!   the same shapes come back on every extraction.
//! - [`SystemAllocator`] frees on release. Used when a caller does not name
//!   an allocator.
//!
//! # Thread Safety
//! Live-byte accounting is an atomic reservation, buckets and statistics
//! sit behind `Mutex`es, so one allocator can be shared by any number of
//! concurrent extractors through `Arc<dyn Allocator>`.
//!
//! # Size Classes
//! A pooled request is rounded up to the next power of two (minimum 4 KiB).
//! A bucket therefore satisfies every request of its class and alignment.

use crate::guard::{Block, MAX_ALIGN};
use crate::{AllocationStats, BufferGuard, MemoryBudget, MemoryError};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Smallest pooled size class.
const MIN_SIZE_CLASS: usize = 4096;

/// Free-list key: `(size class, alignment)`.
type BucketKey = (usize, usize);

/// Source of aligned, zeroed buffers.
///
/// Implementations must be shareable across threads; the runtime hands the
/// same allocator to every extractor created from a net.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Allocates `size_bytes` bytes aligned to `align`.
    ///
    /// # Errors
    /// - [`MemoryError::ZeroSizedAllocation`] for empty requests.
    /// - [`MemoryError::UnsupportedAlignment`] if `align` is not a power of
    ///   two or exceeds [`MAX_ALIGN`].
    /// - [`MemoryError::OutOfMemory`] if a budget would be exceeded.
    fn allocate(&self, size_bytes: usize, align: usize) -> Result<BufferGuard, MemoryError>;

    /// Snapshot of the allocator's counters.
    fn stats(&self) -> AllocationStats;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// State shared between an allocator and the guards it handed out.
pub(crate) struct PoolInner {
    label: &'static str,
    recycle: bool,
    budget: MemoryBudget,
    allocated_bytes: AtomicUsize,
    buckets: Mutex<HashMap<BucketKey, Vec<Vec<Block>>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
}

impl PoolInner {
    fn new(label: &'static str, recycle: bool, budget: MemoryBudget) -> Arc<Self> {
        Arc::new(Self {
            label,
            recycle,
            budget,
            allocated_bytes: AtomicUsize::new(0),
            buckets: Mutex::new(HashMap::new()),
            free_list_bytes: AtomicUsize::new(0),
            stats: Mutex::new(AllocationStats::default()),
        })
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn acquire(self: &Arc<Self>, size_bytes: usize, align: usize) -> Result<BufferGuard, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        if !align.is_power_of_two() || align > MAX_ALIGN {
            return Err(MemoryError::UnsupportedAlignment {
                align,
                max: MAX_ALIGN,
            });
        }

        // Reserve before touching the heap so concurrent requests cannot
        // jointly overshoot the budget.
        let budget = self.budget;
        let reserved = self
            .allocated_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                budget.admits(live, size_bytes).then(|| live + size_bytes)
            });
        let live_before = match reserved {
            Ok(live) => live,
            Err(live) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_oom();
                }
                return Err(MemoryError::OutOfMemory {
                    requested_bytes: size_bytes,
                    available_bytes: budget.as_bytes().saturating_sub(live),
                    budget_bytes: budget.as_bytes(),
                });
            }
        };

        let class = size_class_for(size_bytes);
        let reused = if self.recycle {
            self.buckets
                .lock()
                .ok()
                .and_then(|mut buckets| buckets.get_mut(&(class, align)).and_then(Vec::pop))
        } else {
            None
        };

        let is_hit = reused.is_some();
        let blocks = match reused {
            Some(mut blocks) => {
                self.free_list_bytes
                    .fetch_sub(blocks.len() * MAX_ALIGN, Ordering::AcqRel);
                bytemuck::cast_slice_mut::<Block, u8>(&mut blocks)[..size_bytes].fill(0);
                blocks
            }
            None if self.recycle => Block::run(class / MAX_ALIGN),
            None => Block::run(size_bytes.div_ceil(MAX_ALIGN)),
        };

        if let Ok(mut stats) = self.stats.lock() {
            if is_hit {
                stats.record_hit(size_bytes);
            } else {
                stats.record_miss(size_bytes);
            }
            stats.update_peak(live_before + size_bytes);
        }

        Ok(BufferGuard::new(blocks, size_bytes, align, Arc::clone(self)))
    }

    pub(crate) fn release(&self, blocks: Vec<Block>, size_bytes: usize, align: usize) {
        self.allocated_bytes.fetch_sub(size_bytes, Ordering::AcqRel);
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_release();
        }
        if !self.recycle || blocks.is_empty() {
            return;
        }
        let bytes = blocks.len() * MAX_ALIGN;
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets
                .entry((size_class_for(size_bytes), align))
                .or_default()
                .push(blocks);
            self.free_list_bytes.fetch_add(bytes, Ordering::AcqRel);
        }
    }

    fn snapshot(&self) -> AllocationStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Bucketed, budget-aware allocator.
///
/// # Example
/// ```
/// use memory_manager::{Allocator, MemoryBudget, PoolAllocator};
///
/// let pool = PoolAllocator::new(MemoryBudget::from_kb(64));
/// let a = pool.allocate(10_000, 32).unwrap();
/// drop(a);
/// let _b = pool.allocate(12_000, 32).unwrap(); // same 16 KiB bucket
/// assert_eq!(pool.stats().cache_hits, 1);
/// ```
#[derive(Clone)]
pub struct PoolAllocator {
    inner: Arc<PoolInner>,
}

impl PoolAllocator {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: PoolInner::new("pool", true, budget),
        }
    }

    /// A pool without a ceiling.
    pub fn unbounded() -> Self {
        Self::new(MemoryBudget::unlimited())
    }

    /// Live bytes (handed out and not yet dropped).
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    pub fn available_bytes(&self) -> usize {
        self.inner.budget.as_bytes().saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Bytes parked in buckets.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }

    /// Number of parked buffers across all buckets.
    pub fn parked_buffers(&self) -> usize {
        self.inner
            .buckets
            .lock()
            .map(|b| b.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Drops every parked buffer. Live buffers are unaffected.
    pub fn shrink(&self) {
        if let Ok(mut buckets) = self.inner.buckets.lock() {
            buckets.clear();
            self.inner.free_list_bytes.store(0, Ordering::Release);
        }
    }
}

impl Allocator for PoolAllocator {
    fn allocate(&self, size_bytes: usize, align: usize) -> Result<BufferGuard, MemoryError> {
        self.inner.acquire(size_bytes, align)
    }

    fn stats(&self) -> AllocationStats {
        self.inner.snapshot()
    }

    fn name(&self) -> &'static str {
        self.inner.label
    }
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("free_list_bytes", &self.free_list_bytes())
            .finish()
    }
}

/// Unpooled allocator: every release frees immediately.
#[derive(Clone)]
pub struct SystemAllocator {
    inner: Arc<PoolInner>,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self {
            inner: PoolInner::new("system", false, MemoryBudget::unlimited()),
        }
    }

    /// Process-wide instance used when no allocator is supplied.
    pub fn global() -> &'static SystemAllocator {
        static GLOBAL: OnceLock<SystemAllocator> = OnceLock::new();
        GLOBAL.get_or_init(SystemAllocator::new)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, size_bytes: usize, align: usize) -> Result<BufferGuard, MemoryError> {
        self.inner.acquire(size_bytes, align)
    }

    fn stats(&self) -> AllocationStats {
        self.inner.snapshot()
    }

    fn name(&self) -> &'static str {
        self.inner.label
    }
}

impl fmt::Debug for SystemAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemAllocator")
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

/// Smallest power of two `>= size` and `>= MIN_SIZE_CLASS`.
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}
