// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Allocator counters.
//!
//! [`AllocationStats`] is a snapshot taken from an allocator. The runtime
//! compares snapshots before and after an extraction to report how many
//! buffers a run actually touched and how often the free lists paid off.

/// Cumulative allocator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocationStats {
    /// Requests received, including failed ones.
    pub total_allocations: u64,
    /// Requests served from a free-list bucket.
    pub cache_hits: u64,
    /// Requests that needed fresh memory.
    pub cache_misses: u64,
    /// Requests rejected by the budget.
    pub oom_count: u64,
    /// High-water mark of live bytes.
    pub peak_allocated_bytes: usize,
    /// Bytes handed out over the allocator's lifetime.
    pub cumulative_allocated_bytes: u64,
    /// Buffers released (returned to a bucket or freed).
    pub total_deallocations: u64,
}

impl AllocationStats {
    /// Hit ratio in `[0.0, 1.0]`, `0.0` before the first request.
    pub fn cache_hit_ratio(&self) -> f64 {
        let served = self.cache_hits + self.cache_misses;
        if served == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / served as f64
    }

    /// Number of successful requests.
    pub fn served(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    /// Successful requests recorded in `self` but not in `earlier`.
    pub fn served_since(&self, earlier: &AllocationStats) -> u64 {
        self.served().saturating_sub(earlier.served())
    }

    pub(crate) fn record_hit(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_hits += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_miss(&mut self, size: usize) {
        self.total_allocations += 1;
        self.cache_misses += 1;
        self.cumulative_allocated_bytes += size as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.total_allocations += 1;
        self.oom_count += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.total_deallocations += 1;
    }

    pub(crate) fn update_peak(&mut self, live_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(live_bytes);
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        let peak_kb = self.peak_allocated_bytes as f64 / 1024.0;
        format!(
            "{} requests ({} hits, {} misses, {:.0}% reuse), {} OOM, peak {:.1} KB, {} released",
            self.total_allocations,
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_ratio() * 100.0,
            self.oom_count,
            peak_kb,
            self.total_deallocations,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let mut s = AllocationStats::default();
        assert_eq!(s.cache_hit_ratio(), 0.0);
        s.record_hit(64);
        s.record_hit(64);
        s.record_miss(64);
        s.record_oom();
        assert!((s.cache_hit_ratio() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.total_allocations, 4);
        assert_eq!(s.served(), 3);
    }

    #[test]
    fn test_served_since() {
        let mut s = AllocationStats::default();
        s.record_miss(10);
        let before = s.clone();
        s.record_hit(10);
        s.record_miss(10);
        assert_eq!(s.served_since(&before), 2);
        assert_eq!(before.served_since(&s), 0);
    }

    #[test]
    fn test_peak_is_monotonic() {
        let mut s = AllocationStats::default();
        s.update_peak(300);
        s.update_peak(100);
        assert_eq!(s.peak_allocated_bytes, 300);
    }

    #[test]
    fn test_summary_mentions_counts() {
        let mut s = AllocationStats::default();
        s.record_miss(2048);
        s.record_hit(2048);
        s.record_release();
        let text = s.summary();
        assert!(text.contains("2 requests"));
        assert!(text.contains("1 hits"));
        assert!(text.contains("1 released"));
    }
}
