// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight stream in SafeTensors format.
//!
//! Each tensor is keyed `"<layer>.<slot>"` (e.g. `"conv1.weight"`,
//! `"conv1.bias"`, `"pad1.per_channel_pad"`) and carries its storage type
//! and extents, outermost first as written by training frameworks
//! (`[num_output, in_channels, kernel_h, kernel_w]` for a convolution).
//!
//! [`WeightStore`] decodes every entry to f32 once at load time; operators
//! repack from there. [`WeightArchive`] builds streams for tooling and tests.

use crate::ModelError;
use half::{bf16, f16};
use safetensors::{Dtype, SafeTensors};
use std::collections::BTreeMap;
use std::path::Path;
use tensor_core::{Shape, Tensor};

/// One decoded weight.
#[derive(Debug, Clone)]
pub struct Weight {
    /// Extents as stored in the stream, outermost first.
    pub dims: Vec<usize>,
    /// Flat f32 data (rank 1, unpacked).
    pub data: Tensor,
}

impl Weight {
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn as_f32(&self) -> &[f32] {
        self.data.as_f32_slice()
    }
}

/// Decoded weights keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WeightStore {
    weights: BTreeMap<String, Weight>,
}

impl WeightStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a SafeTensors stream.
    ///
    /// # Errors
    /// [`ModelError::Weights`] for malformed headers, out-of-range offsets
    /// or storage types other than F32, F16, BF16, I8, I32 and I64.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        let tensors = SafeTensors::deserialize(bytes)
            .map_err(|e| ModelError::Weights(format!("SafeTensors parse error: {e}")))?;

        let mut weights = BTreeMap::new();
        for (name, view) in tensors.tensors() {
            let values = decode_f32(view.dtype(), view.data())
                .ok_or_else(|| ModelError::Weights(format!("'{name}': unsupported storage type {:?}", view.dtype())))?;
            let dims = view.shape().to_vec();
            let data = Tensor::from_f32(Shape::d1(values.len()), &values)
                .map_err(|e| ModelError::Weights(format!("'{name}': {e}")))?;
            weights.insert(name, Weight { dims, data });
        }
        Ok(Self { weights })
    }

    /// Memory-maps and parses a `.safetensors` file.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let file = std::fs::File::open(path)
            .map_err(|e| ModelError::Weights(format!("cannot open '{}': {e}", path.display())))?;
        // SAFETY: the map is read-only and dropped before this function returns;
        // decoded weights are copied out.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| ModelError::Weights(format!("mmap failed: {e}")))?;
        Self::from_bytes(&mmap)
    }

    pub fn get(&self, name: &str) -> Option<&Weight> {
        self.weights.get(name)
    }

    /// Weight `slot` of `layer`, e.g. `("conv1", "bias")`.
    pub fn layer_weight(&self, layer: &str, slot: &str) -> Option<&Weight> {
        self.weights.get(&format!("{layer}.{slot}"))
    }

    pub fn insert(&mut self, name: impl Into<String>, dims: Vec<usize>, values: &[f32]) -> Result<(), ModelError> {
        let name = name.into();
        let expected: usize = dims.iter().product();
        if expected != values.len() {
            return Err(ModelError::Weights(format!(
                "'{name}': {} values for extents {dims:?}",
                values.len()
            )));
        }
        let data = Tensor::from_f32(Shape::d1(values.len()), values)
            .map_err(|e| ModelError::Weights(format!("'{name}': {e}")))?;
        self.weights.insert(name, Weight { dims, data });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    /// Decoded f32 footprint.
    pub fn total_bytes(&self) -> usize {
        self.weights.values().map(|w| w.data.size_bytes()).sum()
    }
}

fn decode_f32(dtype: Dtype, bytes: &[u8]) -> Option<Vec<f32>> {
    let values = match dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::I8 => bytes.iter().map(|&b| b as i8 as f32).collect(),
        Dtype::I32 => bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32)
            .collect(),
        Dtype::I64 => bytes
            .chunks_exact(8)
            .map(|b| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                i64::from_le_bytes(raw) as f32
            })
            .collect(),
        _ => return None,
    };
    Some(values)
}

/// Builder for SafeTensors weight streams.
///
/// # Example
/// ```
/// use model_ir::{WeightArchive, WeightStore};
///
/// let mut archive = WeightArchive::new();
/// archive.add_f32("conv1.weight", &[2, 1, 1, 1], &[0.5, -0.5]);
/// archive.add_f16("conv1.bias", &[2], &[1.0, 2.0]);
/// let bytes = archive.to_bytes().unwrap();
///
/// let store = WeightStore::from_bytes(&bytes).unwrap();
/// assert_eq!(store.layer_weight("conv1", "bias").unwrap().as_f32(), &[1.0, 2.0]);
/// ```
#[derive(Debug, Default)]
pub struct WeightArchive {
    entries: BTreeMap<String, (Dtype, Vec<usize>, Vec<u8>)>,
}

impl WeightArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, dims: &[usize], values: &[f32]) -> &mut Self {
        let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.insert(name.to_string(), (Dtype::F32, dims.to_vec(), bytes));
        self
    }

    pub fn add_f16(&mut self, name: &str, dims: &[usize], values: &[f32]) -> &mut Self {
        let bytes = values
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect();
        self.entries.insert(name.to_string(), (Dtype::F16, dims.to_vec(), bytes));
        self
    }

    pub fn add_i8(&mut self, name: &str, dims: &[usize], values: &[i8]) -> &mut Self {
        let bytes = values.iter().map(|&v| v as u8).collect();
        self.entries.insert(name.to_string(), (Dtype::I8, dims.to_vec(), bytes));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialises the archive.
    ///
    /// # Errors
    /// [`ModelError::Weights`] if an entry's byte length does not match its extents.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        let mut views = Vec::with_capacity(self.entries.len());
        for (name, (dtype, dims, bytes)) in &self.entries {
            let view = safetensors::tensor::TensorView::new(*dtype, dims.clone(), bytes)
                .map_err(|e| ModelError::Weights(format!("'{name}': {e}")))?;
            views.push((name.as_str(), view));
        }
        safetensors::serialize(views, &None).map_err(|e| ModelError::Weights(format!("serialise failed: {e}")))
    }

    /// Writes the archive to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), ModelError> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}
