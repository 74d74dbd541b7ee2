// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution options shared by every operator call.
//!
//! # TOML Format
//! ```toml
//! num_threads = 4
//! use_packing_layout = true
//! use_fp16_storage = false
//! lightmode = true
//! max_tier = "avx2"
//! ```
//!
//! Allocators are runtime objects and never serialised; a deserialised
//! `ExecOptions` uses the process-wide system allocator until one is set.

use crate::{OpError, Tier};
use memory_manager::{Allocator, SharedAllocator};
use std::fmt;
use std::sync::Once;
use tensor_core::DType;

static INT8_FALLBACK: Once = Once::new();

/// Flags and resources for one execution.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExecOptions {
    /// Threads for per-channel parallel loops.
    pub num_threads: usize,
    /// Allocator for tensors that outlive a layer call (blobs).
    #[serde(skip)]
    pub blob_allocator: Option<SharedAllocator>,
    /// Allocator for scratch reused within one extraction.
    #[serde(skip)]
    pub workspace_allocator: Option<SharedAllocator>,
    /// Allow lane-packed layouts.
    pub use_packing_layout: bool,
    pub use_fp16_storage: bool,
    pub use_bf16_storage: bool,
    /// Accepted for compatibility. No layer has int8 kernels, so
    /// activations stay in float storage and a warning is logged once.
    pub use_int8_inference: bool,
    /// Route supported layers to the GPU tier.
    pub use_vulkan_compute: bool,
    /// Release intermediate blobs once their last scheduled consumer ran,
    /// and let in-place layers overwrite such a blob. Memoization across
    /// extractions is then best-effort: a released blob is recomputed by
    /// the next extraction that needs it.
    pub lightmode: bool,
    /// Upper bound on the tier width kernels may use.
    pub max_tier: Option<Tier>,
}

/// `available_parallelism`, or 1 when it cannot be determined.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            num_threads: default_threads(),
            blob_allocator: None,
            workspace_allocator: None,
            use_packing_layout: true,
            use_fp16_storage: false,
            use_bf16_storage: false,
            use_int8_inference: false,
            use_vulkan_compute: false,
            lightmode: true,
            max_tier: None,
        }
    }
}

impl ExecOptions {
    /// Rejects contradictory or out-of-range settings.
    pub fn validate(&self) -> Result<(), OpError> {
        if self.num_threads == 0 {
            return Err(OpError::InvalidParam("num_threads must be at least 1".into()));
        }
        if self.use_fp16_storage && self.use_bf16_storage {
            return Err(OpError::InvalidParam(
                "use_fp16_storage and use_bf16_storage are mutually exclusive".into(),
            ));
        }
        if self.max_tier == Some(Tier::Gpu) {
            return Err(OpError::InvalidParam(
                "max_tier caps CPU tiers; use use_vulkan_compute for the GPU".into(),
            ));
        }
        Ok(())
    }

    pub fn from_toml(s: &str) -> Result<Self, OpError> {
        let opt: Self = toml::from_str(s).map_err(|e| OpError::InvalidParam(format!("TOML parse error: {e}")))?;
        opt.validate()?;
        Ok(opt)
    }

    pub fn to_toml(&self) -> Result<String, OpError> {
        toml::to_string_pretty(self).map_err(|e| OpError::InvalidParam(format!("TOML serialise error: {e}")))
    }

    /// Storage type for activations when a layer supports reduced precision.
    pub fn storage_dtype(&self) -> DType {
        if self.use_int8_inference {
            INT8_FALLBACK.call_once(|| {
                tracing::warn!("int8 inference requested but no int8 kernels are registered; using float storage");
            });
        }
        if self.use_fp16_storage {
            DType::F16
        } else if self.use_bf16_storage {
            DType::BF16
        } else {
            DType::F32
        }
    }

    pub fn blob_alloc(&self) -> Option<&dyn Allocator> {
        self.blob_allocator.as_deref()
    }

    pub fn workspace_alloc(&self) -> Option<&dyn Allocator> {
        self.workspace_allocator.as_deref()
    }
}

impl fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOptions")
            .field("num_threads", &self.num_threads)
            .field("blob_allocator", &self.blob_allocator.as_ref().map(|a| a.name()))
            .field("workspace_allocator", &self.workspace_allocator.as_ref().map(|a| a.name()))
            .field("use_packing_layout", &self.use_packing_layout)
            .field("use_fp16_storage", &self.use_fp16_storage)
            .field("use_bf16_storage", &self.use_bf16_storage)
            .field("use_int8_inference", &self.use_int8_inference)
            .field("use_vulkan_compute", &self.use_vulkan_compute)
            .field("lightmode", &self.lightmode)
            .field("max_tier", &self.max_tier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_manager::PoolAllocator;
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let opt = ExecOptions::default();
        assert!(opt.num_threads >= 1);
        assert!(opt.use_packing_layout);
        assert!(opt.lightmode);
        assert_eq!(opt.storage_dtype(), DType::F32);
        opt.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects() {
        let zero = ExecOptions {
            num_threads: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let both = ExecOptions {
            use_fp16_storage: true,
            use_bf16_storage: true,
            ..Default::default()
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_toml_partial() {
        let opt = ExecOptions::from_toml("num_threads = 2\nuse_fp16_storage = true\nmax_tier = \"sse2\"\n").unwrap();
        assert_eq!(opt.num_threads, 2);
        assert_eq!(opt.storage_dtype(), DType::F16);
        assert_eq!(opt.max_tier, Some(Tier::Sse2));
        assert!(opt.use_packing_layout);
        assert!(ExecOptions::from_toml("num_threads = 0").is_err());
    }

    #[test]
    fn test_toml_skips_allocators() {
        let opt = ExecOptions {
            blob_allocator: Some(Arc::new(PoolAllocator::unbounded())),
            ..Default::default()
        };
        let text = opt.to_toml().unwrap();
        assert!(!text.contains("allocator"));
        let back = ExecOptions::from_toml(&text).unwrap();
        assert!(back.blob_allocator.is_none());
        assert_eq!(back.num_threads, opt.num_threads);
    }

    #[test]
    fn test_debug_names_allocators() {
        let opt = ExecOptions {
            workspace_allocator: Some(Arc::new(PoolAllocator::unbounded())),
            ..Default::default()
        };
        let text = format!("{opt:?}");
        assert!(text.contains("pool"));
        assert!(text.contains("blob_allocator: None"));
    }

    #[test]
    fn test_int8_request_falls_back() {
        let int8 = ExecOptions {
            use_int8_inference: true,
            ..Default::default()
        };
        assert_eq!(int8.storage_dtype(), DType::F32);
        let int8_fp16 = ExecOptions {
            use_fp16_storage: true,
            ..int8
        };
        assert_eq!(int8_fp16.storage_dtype(), DType::F16);
        // The warning fires once; later calls stay quiet and agree.
        assert_eq!(int8_fp16.storage_dtype(), DType::F16);
    }
}
