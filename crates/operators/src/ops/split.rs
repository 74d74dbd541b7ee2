// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

use crate::operator::{single_input, Capabilities, Operator};
use crate::{ExecOptions, OpError};
use model_ir::{LayerDef, OpKind};
use tensor_core::Tensor;

/// Hands the same buffer to every output blob.
#[derive(Debug)]
pub struct Split {
    name: String,
    num_outputs: usize,
}

impl Split {
    pub fn new(layer: &LayerDef) -> Self {
        Self {
            name: layer.name.clone(),
            num_outputs: layer.outputs.len().max(1),
        }
    }
}

impl Operator for Split {
    fn kind(&self) -> OpKind {
        OpKind::Split
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

    fn preferred_elempack(&self, input: &Tensor, _opt: &ExecOptions) -> usize {
        input.elempack()
    }

    fn forward(&self, inputs: &[Tensor], _opt: &ExecOptions) -> Result<Vec<Tensor>, OpError> {
        let src = single_input(inputs, &self.name)?;
        Ok(vec![src.clone(); self.num_outputs])
    }

    fn selected_backend(&self) -> String {
        "scalar:share".to_string()
    }
}
