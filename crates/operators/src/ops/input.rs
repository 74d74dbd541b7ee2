// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::operator::{Capabilities, Operator};
use crate::{ExecOptions, OpError};
use model_ir::{LayerDef, OpKind};
use tensor_core::Tensor;

/// Marks a blob the caller seeds. The extractor never runs it.
#[derive(Debug)]
pub struct Input {
    name: String,
}

impl Input {
    pub fn new(layer: &LayerDef) -> Self {
        Self {
            name: layer.name.clone(),
        }
    }
}

impl Operator for Input {
    fn kind(&self) -> OpKind {
        OpKind::Input
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            support_packing: true,
            support_fp16_storage: true,
            support_bf16_storage: true,
            ..Default::default()
        }
    }

    fn forward(&self, _inputs: &[Tensor], _opt: &ExecOptions) -> Result<Vec<Tensor>, OpError> {
        Err(OpError::Unsupported(format!(
            "input layer '{}' has no data; seed it before extracting",
            self.name
        )))
    }

    fn selected_backend(&self) -> String {
        "none".to_string()
    }
}
