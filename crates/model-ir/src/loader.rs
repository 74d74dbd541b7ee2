// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model loading from a description + weight stream.
//!
//! A model directory contains:
//! - `model.json`: the layer graph (see [`ModelManifest`]).
//! - `model.safetensors`: the weights, optional for weightless graphs.
//!
//! Loading yields a [`LoadedModel`]: a validated graph plus decoded weights.

use crate::graph::Validated;
use crate::{ModelError, ModelGraph, ModelManifest, WeightStore};
use std::collections::HashSet;
use std::path::Path;

/// Default manifest filename.
pub const MANIFEST_FILE: &str = "model.json";

/// Default weight-stream filename.
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// A validated graph together with its weights.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub graph: ModelGraph<Validated>,
    pub weights: WeightStore,
}

/// Entry points for reading models.
///
/// # Example
/// ```no_run
/// use model_ir::ModelLoader;
/// use std::path::Path;
///
/// let model = ModelLoader::load_dir(Path::new("./models/tiny-unet")).unwrap();
/// println!("{}", model.graph.summary());
/// ```
pub struct ModelLoader;

impl ModelLoader {
    /// Loads `model.json` and, if present, `model.safetensors` from `dir`.
    pub fn load_dir(dir: &Path) -> Result<LoadedModel, ModelError> {
        Self::load_files(&dir.join(MANIFEST_FILE), Some(&dir.join(WEIGHTS_FILE)))
    }

    /// Loads an explicit manifest path and optional weight path.
    ///
    /// A weight path that does not exist is treated like `None`.
    pub fn load_files(manifest: &Path, weights: Option<&Path>) -> Result<LoadedModel, ModelError> {
        let manifest = ModelManifest::from_file(manifest)?;
        let weights = match weights {
            Some(path) if path.exists() => WeightStore::from_file(path)?,
            Some(path) => {
                tracing::debug!("no weight file at {}", path.display());
                WeightStore::empty()
            }
            None => WeightStore::empty(),
        };
        Self::assemble(&manifest, weights)
    }

    /// Loads from in-memory manifest JSON and SafeTensors bytes.
    pub fn load_bytes(manifest_json: &str, weight_bytes: &[u8]) -> Result<LoadedModel, ModelError> {
        let manifest = ModelManifest::from_json(manifest_json)?;
        Self::assemble(&manifest, WeightStore::from_bytes(weight_bytes)?)
    }

    /// Validates `manifest` and pairs it with `weights`.
    pub fn assemble(manifest: &ModelManifest, weights: WeightStore) -> Result<LoadedModel, ModelError> {
        let graph = ModelGraph::from_manifest(manifest)?.validate()?;

        let layer_names: HashSet<&str> = graph.layers().iter().map(|l| l.name.as_str()).collect();
        for name in weights.names() {
            let owner = name.rsplit_once('.').map(|(layer, _)| layer).unwrap_or(name);
            if !layer_names.contains(owner) {
                tracing::warn!("weight '{name}' does not belong to any layer and will be ignored");
            }
        }

        tracing::info!(
            "loaded model '{}': {} layers, {} weights ({:.1} KB)",
            graph.name,
            graph.num_layers(),
            weights.len(),
            weights.total_bytes() as f64 / 1024.0,
        );
        Ok(LoadedModel { graph, weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WeightArchive;

    const MANIFEST: &str = r#"{
        "name": "one-conv",
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"], "params": { "w": 4, "h": 4, "c": 1 } },
            { "type": "Convolution", "name": "conv", "inputs": ["data"], "outputs": ["out"],
              "params": { "num_output": 2, "kernel_w": 1 } }
        ]
    }"#;

    fn weights() -> Vec<u8> {
        let mut a = WeightArchive::new();
        a.add_f32("conv.weight", &[2, 1, 1, 1], &[1.0, -1.0]);
        a.to_bytes().unwrap()
    }

    #[test]
    fn test_load_bytes() {
        let model = ModelLoader::load_bytes(MANIFEST, &weights()).unwrap();
        assert_eq!(model.graph.num_layers(), 2);
        assert!(model.weights.layer_weight("conv", "weight").is_some());
    }

    #[test]
    fn test_invalid_graph_yields_no_model() {
        let bad = MANIFEST.replace("\"inputs\": [\"data\"]", "\"inputs\": [\"nothing\"]");
        assert!(matches!(
            ModelLoader::load_bytes(&bad, &weights()),
            Err(ModelError::DanglingBlob { .. })
        ));
    }

    #[test]
    fn test_load_dir() {
        let dir = std::env::temp_dir().join(format!("packrt_loader_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), MANIFEST).unwrap();
        std::fs::write(dir.join(WEIGHTS_FILE), weights()).unwrap();

        let model = ModelLoader::load_dir(&dir).unwrap();
        assert_eq!(model.weights.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_dir_missing_manifest() {
        let dir = std::env::temp_dir().join("packrt_loader_missing");
        assert!(matches!(
            ModelLoader::load_dir(&dir),
            Err(ModelError::ManifestRead(_))
        ));
    }
}
