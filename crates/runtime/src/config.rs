// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! model_path = "./models/tiny-unet"
//! memory_budget = "256M"
//! workspace_budget = "64M"
//! num_threads = 4
//! use_packing_layout = true
//! use_fp16_storage = false
//! lightmode = true
//! max_tier = "avx2"
//! ```
//!
//! Every key is optional. Budgets accept `"unlimited"` or a number with a
//! `K`, `M` or `G` suffix.

use crate::{Net, RuntimeError};
use memory_manager::{MemoryBudget, PoolAllocator, SharedAllocator};
use model_ir::ModelLoader;
use operators::{default_threads, ExecOptions, Tier};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Configuration for loading and running a net.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding the model description and weights.
    pub model_path: PathBuf,
    /// Model description filename inside `model_path`.
    pub manifest_file: String,
    /// Weight stream filename inside `model_path`.
    pub weights_file: String,
    /// Ceiling for blob storage (human-readable, e.g. `"512M"`).
    pub memory_budget: String,
    /// Ceiling for operator scratch.
    pub workspace_budget: String,
    /// Worker threads (defaults to the number of online CPU cores).
    pub num_threads: Option<usize>,
    pub use_packing_layout: bool,
    pub use_fp16_storage: bool,
    pub use_bf16_storage: bool,
    pub use_int8_inference: bool,
    pub use_vulkan_compute: bool,
    pub lightmode: bool,
    /// Cap on the instruction-set tier kernels may use.
    pub max_tier: Option<Tier>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let opt = ExecOptions::default();
        Self {
            model_path: PathBuf::from("."),
            manifest_file: model_ir::MANIFEST_FILE.to_string(),
            weights_file: model_ir::WEIGHTS_FILE.to_string(),
            memory_budget: "unlimited".to_string(),
            workspace_budget: "unlimited".to_string(),
            num_threads: None,
            use_packing_layout: opt.use_packing_layout,
            use_fp16_storage: opt.use_fp16_storage,
            use_bf16_storage: opt.use_bf16_storage,
            use_int8_inference: opt.use_int8_inference,
            use_vulkan_compute: opt.use_vulkan_compute,
            lightmode: opt.lightmode,
            max_tier: opt.max_tier,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Config(format!("cannot read config '{}': {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str).map_err(|e| RuntimeError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| RuntimeError::Config(format!("TOML serialise error: {e}")))
    }

    /// Parses `memory_budget` and `workspace_budget`.
    pub fn parse_budgets(&self) -> Result<(MemoryBudget, MemoryBudget), RuntimeError> {
        let parse = |key: &str, value: &str| {
            MemoryBudget::parse(value).map_err(|e| RuntimeError::Config(format!("invalid {key}: {e}")))
        };
        Ok((
            parse("memory_budget", &self.memory_budget)?,
            parse("workspace_budget", &self.workspace_budget)?,
        ))
    }

    /// Resolves the number of worker threads.
    pub fn resolve_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(default_threads)
    }

    /// Builds execution options with budgeted blob and workspace pools.
    pub fn exec_options(&self) -> Result<ExecOptions, RuntimeError> {
        let (blob_budget, workspace_budget) = self.parse_budgets()?;
        let blob: SharedAllocator = Arc::new(PoolAllocator::new(blob_budget));
        let workspace: SharedAllocator = Arc::new(PoolAllocator::new(workspace_budget));
        let opt = ExecOptions {
            num_threads: self.resolve_threads(),
            blob_allocator: Some(blob),
            workspace_allocator: Some(workspace),
            use_packing_layout: self.use_packing_layout,
            use_fp16_storage: self.use_fp16_storage,
            use_bf16_storage: self.use_bf16_storage,
            use_int8_inference: self.use_int8_inference,
            use_vulkan_compute: self.use_vulkan_compute,
            lightmode: self.lightmode,
            max_tier: self.max_tier,
        };
        opt.validate().map_err(|e| RuntimeError::Config(e.to_string()))?;
        Ok(opt)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.model_path.join(&self.manifest_file)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.model_path.join(&self.weights_file)
    }

    /// Loads the model named by this config and builds a net over it.
    pub fn load_net(&self) -> Result<Net, RuntimeError> {
        let opt = self.exec_options()?;
        tracing::info!(
            "loading '{}' with {} threads, budget {} / workspace {}",
            self.model_path.display(),
            opt.num_threads,
            self.memory_budget,
            self.workspace_budget
        );
        let model = ModelLoader::load_files(&self.manifest_path(), Some(&self.weights_path()))?;
        Net::from_model(model, opt)
    }
}
