// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON model description.
//!
//! The manifest (`model.json`) lists layers in file order. Each layer names
//! its operator type, the blobs it consumes and produces, and its
//! parameters. Optional blob declarations pin the shape of input blobs.
//!
//! # Format
//! ```json
//! {
//!   "name": "tiny-unet",
//!   "blobs": [ { "name": "data", "shape": [32, 32, 3] } ],
//!   "layers": [
//!     { "type": "Input", "name": "data", "outputs": ["data"],
//!       "params": { "w": 32, "h": 32, "c": 3 } },
//!     { "type": "Convolution", "name": "conv1",
//!       "inputs": ["data"], "outputs": ["conv1"],
//!       "params": { "num_output": 16, "kernel_w": 3, "pad_left": 1 } }
//!   ]
//! }
//! ```
//!
//! Shapes are written innermost first (`[w]`, `[w, h]`, `[w, h, c]`,
//! `[w, h, d, c]`).

use crate::{ModelError, ParamDict};
use std::collections::HashSet;
use std::path::Path;

/// Top-level model description.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub name: String,
    #[serde(default)]
    pub blobs: Vec<BlobDecl>,
    pub layers: Vec<ManifestLayer>,
}

/// Optional shape declaration for a blob.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlobDecl {
    pub name: String,
    pub shape: Vec<usize>,
}

/// One layer entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestLayer {
    /// Operator type name (e.g. `"Convolution"`).
    #[serde(rename = "type")]
    pub layer_type: String,
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub params: ParamDict,
}

impl ModelManifest {
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Cheap structural checks that need no graph.
    ///
    /// - At least one layer.
    /// - Layer names are unique and non-empty.
    /// - Blob declarations are unique and have 1 to 4 non-zero extents.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph("manifest contains no layers".into()));
        }

        let mut names = HashSet::new();
        for layer in &self.layers {
            if layer.name.is_empty() {
                return Err(ModelError::InvalidLayer {
                    layer: format!("<{}>", layer.layer_type),
                    detail: "empty layer name".into(),
                });
            }
            if !names.insert(layer.name.as_str()) {
                return Err(ModelError::DuplicateLayer(layer.name.clone()));
            }
        }

        let mut declared = HashSet::new();
        for blob in &self.blobs {
            if !declared.insert(blob.name.as_str()) {
                return Err(ModelError::ShapeMismatch {
                    blob: blob.name.clone(),
                    detail: "declared more than once".into(),
                });
            }
            if blob.shape.is_empty() || blob.shape.len() > 4 || blob.shape.contains(&0) {
                return Err(ModelError::ShapeMismatch {
                    blob: blob.name.clone(),
                    detail: format!("invalid declared shape {:?}", blob.shape),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "sample",
        "blobs": [ { "name": "data", "shape": [8, 8, 3] } ],
        "layers": [
            { "type": "Input", "name": "data", "outputs": ["data"],
              "params": { "w": 8, "h": 8, "c": 3 } },
            { "type": "Convolution", "name": "conv1", "inputs": ["data"], "outputs": ["conv1"],
              "params": { "num_output": 4, "kernel_w": 3, "bias_term": 1 } },
            { "type": "ReLU", "name": "relu1", "inputs": ["conv1"], "outputs": ["relu1"] }
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let m = ModelManifest::from_json(SAMPLE).unwrap();
        assert_eq!(m.name, "sample");
        assert_eq!(m.layers.len(), 3);
        assert_eq!(m.layers[1].layer_type, "Convolution");
        assert_eq!(m.layers[1].params.int("num_output", 0).unwrap(), 4);
        assert!(m.layers[2].params.is_empty());
        assert_eq!(m.blobs[0].shape, vec![8, 8, 3]);
        m.validate().unwrap();
    }

    #[test]
    fn test_validate_empty() {
        let m = ModelManifest::from_json(r#"{ "name": "e", "layers": [] }"#).unwrap();
        assert!(matches!(m.validate(), Err(ModelError::InvalidGraph(_))));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let m = ModelManifest::from_json(
            r#"{ "name": "d", "layers": [
                { "type": "Input", "name": "x", "outputs": ["a"] },
                { "type": "ReLU", "name": "x", "inputs": ["a"], "outputs": ["b"] }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(m.validate(), Err(ModelError::DuplicateLayer(n)) if n == "x"));
    }

    #[test]
    fn test_validate_bad_blob_decl() {
        let m = ModelManifest::from_json(
            r#"{ "name": "d", "blobs": [ { "name": "a", "shape": [4, 0] } ],
                 "layers": [ { "type": "Input", "name": "a", "outputs": ["a"] } ] }"#,
        )
        .unwrap();
        assert!(matches!(m.validate(), Err(ModelError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ModelManifest::from_json("{ not json"),
            Err(ModelError::ManifestParse(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip() {
        let m = ModelManifest::from_json(SAMPLE).unwrap();
        let back = ModelManifest::from_json(&m.to_json().unwrap()).unwrap();
        assert_eq!(back.layers.len(), 3);
        assert_eq!(back.layers[1].params, m.layers[1].params);
    }
}
