// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer definitions.
//!
//! A [`LayerDef`] is one node of the graph: an operator kind, its
//! parameters, and the ids of the blobs it reads and writes. Weights are
//! not stored here; they are looked up in the
//! [`WeightStore`](crate::WeightStore) under `"<layer name>.<slot>"`.

use crate::{BlobId, ParamDict};
use std::fmt;
use std::str::FromStr;

/// Operator kinds the runtime can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum OpKind {
    /// Declares a blob the caller seeds; never executed.
    Input,
    Convolution,
    Deconvolution,
    Padding,
    ReLU,
    /// Fans one blob out to several consumers without copying.
    Split,
    /// Elementwise product / sum / max over several inputs.
    Eltwise,
}

impl OpKind {
    pub const ALL: [OpKind; 7] = [
        OpKind::Input,
        OpKind::Convolution,
        OpKind::Deconvolution,
        OpKind::Padding,
        OpKind::ReLU,
        OpKind::Split,
        OpKind::Eltwise,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Input => "Input",
            OpKind::Convolution => "Convolution",
            OpKind::Deconvolution => "Deconvolution",
            OpKind::Padding => "Padding",
            OpKind::ReLU => "ReLU",
            OpKind::Split => "Split",
            OpKind::Eltwise => "Eltwise",
        }
    }

    /// `(min inputs, max inputs, min outputs, max outputs)`.
    pub fn arity(self) -> (usize, usize, usize, usize) {
        match self {
            OpKind::Input => (0, 0, 1, 1),
            OpKind::Split => (1, 1, 1, usize::MAX),
            OpKind::Eltwise => (2, usize::MAX, 1, 1),
            _ => (1, 1, 1, 1),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = String;

    /// Case-insensitive; also accepts `Conv` / `Deconv` / `Pad` aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" => Ok(OpKind::Input),
            "convolution" | "conv" => Ok(OpKind::Convolution),
            "deconvolution" | "deconv" => Ok(OpKind::Deconvolution),
            "padding" | "pad" => Ok(OpKind::Padding),
            "relu" => Ok(OpKind::ReLU),
            "split" => Ok(OpKind::Split),
            "eltwise" => Ok(OpKind::Eltwise),
            _ => Err(s.to_string()),
        }
    }
}

/// One node of the model graph.
#[derive(Debug, Clone)]
pub struct LayerDef {
    /// Unique layer name; also the weight-key prefix.
    pub name: String,
    pub kind: OpKind,
    /// Position in the model file (0-based).
    pub index: usize,
    pub inputs: Vec<BlobId>,
    pub outputs: Vec<BlobId>,
    pub params: ParamDict,
}

impl LayerDef {
    /// Weight key for `slot`, e.g. `"conv1.weight"`.
    pub fn weight_key(&self, slot: &str) -> String {
        format!("{}.{slot}", self.name)
    }

    /// Concise one-line description.
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} ({}) in={} out={} params={}",
            self.index,
            self.name,
            self.kind,
            self.inputs.len(),
            self.outputs.len(),
            self.params.len(),
        )
    }
}
