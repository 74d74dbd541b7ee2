// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The model as the runtime receives it: a finalized operator graph plus
//! trained weights.
//!
//! - [`ModelManifest`]: the JSON model description.
//! - [`OpKind`] / [`LayerDef`] / [`ParamDict`]: one node, its kind and its
//!   typed parameters.
//! - [`ModelGraph`]: layers connected through blobs, with a **type-state
//!   pattern** (`Loaded` → `Validated`). Validation rejects dangling blobs,
//!   duplicate producers, cycles and inconsistent shapes, and stores one
//!   topological order.
//! - [`WeightStore`] / [`WeightArchive`]: SafeTensors weight streams.
//! - [`ModelLoader`]: reads a model directory or in-memory buffers.
//! - [`geometry`]: parameter schemas shared by validation and operators.
//!
//! # Example
//! ```
//! use model_ir::ModelLoader;
//!
//! let json = r#"{ "name": "tiny", "layers": [
//!     { "type": "Input", "name": "in", "outputs": ["x"], "params": { "w": 8 } },
//!     { "type": "ReLU", "name": "relu", "inputs": ["x"], "outputs": ["y"] }
//! ] }"#;
//! let model = ModelLoader::load_bytes(json, &[]).unwrap();
//! assert_eq!(model.graph.topo_order(), &[0, 1]);
//! ```

mod error;
pub mod geometry;
pub mod graph;
mod layer;
mod loader;
mod manifest;
mod param;
mod weights;

pub use error::ModelError;
pub use graph::{BlobId, BlobInfo, ModelGraph};
pub use layer::{LayerDef, OpKind};
pub use loader::{LoadedModel, ModelLoader, MANIFEST_FILE, WEIGHTS_FILE};
pub use manifest::{BlobDecl, ManifestLayer, ModelManifest};
pub use param::{ParamDict, ParamValue};
pub use weights::{Weight, WeightArchive, WeightStore};
