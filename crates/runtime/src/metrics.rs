// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Extraction profiling metrics.
//!
//! [`ExtractMetrics`] covers one `extract` call: which layers ran, with
//! which kernel, how long each took, and how many layout or storage
//! conversions the negotiation inserted.

use std::time::Duration;

/// One executed layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerMetrics {
    pub layer_name: String,
    /// Operator kind, e.g. `"Convolution"`.
    pub kind: String,
    /// `tier:kernel` the operator selected.
    pub backend: String,
    pub duration: Duration,
}

/// Aggregate metrics for one extraction.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExtractMetrics {
    /// Blob that was requested.
    pub target: String,
    /// Wall-clock time of the whole call.
    pub total_duration: Duration,
    /// Time spent inside operator `forward` calls.
    pub compute_duration: Duration,
    pub layer_metrics: Vec<LayerMetrics>,
    /// Packing conversions inserted before operators.
    pub packing_conversions: usize,
    /// Storage-type casts inserted before operators.
    pub dtype_conversions: usize,
    /// Inputs already present when the extraction started.
    pub reused_blobs: usize,
    /// Blobs released early by lightmode.
    pub released_blobs: usize,
    /// Layers that overwrote their input instead of allocating an output.
    pub inplace_layers: usize,
    /// Peak live bytes of the blob allocator, if it reports one.
    pub peak_blob_bytes: usize,
    /// Buffers the blob allocator handed out during this call.
    pub blob_allocations: u64,
}

impl ExtractMetrics {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Default::default()
        }
    }

    pub fn record_layer(&mut self, name: &str, kind: String, backend: String, duration: Duration) {
        self.compute_duration += duration;
        self.layer_metrics.push(LayerMetrics {
            layer_name: name.to_string(),
            kind,
            backend,
            duration,
        });
    }

    pub fn finalise(&mut self, total: Duration, peak_blob_bytes: usize, blob_allocations: u64) {
        self.total_duration = total;
        self.peak_blob_bytes = peak_blob_bytes;
        self.blob_allocations = blob_allocations;
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Extract '{}': {:.2}ms total, {} layers ({:.2}ms compute), \
             {} repacks, {} casts, {} reused, {} released, {} in-place, {} allocations, peak {:.2} MB",
            self.target,
            self.total_duration.as_secs_f64() * 1000.0,
            self.layer_metrics.len(),
            self.compute_duration.as_secs_f64() * 1000.0,
            self.packing_conversions,
            self.dtype_conversions,
            self.reused_blobs,
            self.released_blobs,
            self.inplace_layers,
            self.blob_allocations,
            self.peak_blob_bytes as f64 / (1024.0 * 1024.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = ExtractMetrics::new("out");
        assert_eq!(m.target, "out");
        assert!(m.layer_metrics.is_empty());
        assert_eq!(m.compute_duration, Duration::ZERO);
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = ExtractMetrics::new("out");
        m.record_layer("conv", "Convolution".into(), "avx2:packed_to_8".into(), Duration::from_millis(4));
        m.record_layer("relu", "ReLU".into(), "avx2:flat".into(), Duration::from_millis(1));
        m.finalise(Duration::from_millis(7), 4096, 2);

        assert_eq!(m.layer_metrics.len(), 2);
        assert_eq!(m.compute_duration, Duration::from_millis(5));
        assert_eq!(m.peak_blob_bytes, 4096);
        assert_eq!(m.blob_allocations, 2);
    }

    #[test]
    fn test_summary_format() {
        let mut m = ExtractMetrics::new("prob");
        m.record_layer("conv", "Convolution".into(), "scalar:reference".into(), Duration::from_millis(2));
        m.packing_conversions = 3;
        m.finalise(Duration::from_millis(3), 0, 0);

        let s = m.summary();
        assert!(s.contains("Extract 'prob'"));
        assert!(s.contains("1 layers"));
        assert!(s.contains("3 repacks"));
    }

    #[test]
    fn test_serialises() {
        let json = serde_json::to_string(&ExtractMetrics::new("x")).unwrap();
        assert!(json.contains("\"packing_conversions\":0"));
    }
}
