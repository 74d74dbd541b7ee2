// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The operator abstraction and the factory that instantiates it.
//!
//! # Lifecycle
//!
//! ```text
//!   create_operator(layer)     parse params
//!        │
//!   load_model(weights)        copy the layer's weights
//!        │
//!   create_pipeline(opt)       choose packing + tier, repack weights
//!        │
//!   forward(inputs, opt) ...   any number of times, from any thread
//!   (or forward_inplace)
//! ```
//!
//! After `create_pipeline` an operator is immutable, so a net can be shared
//! between concurrent extractors.

use crate::ops::{Convolution, Deconvolution, Eltwise, Input, Padding, ReLU, Split};
use crate::{pick_elempack, ExecOptions, OpError};
use model_ir::{LayerDef, OpKind, WeightStore};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tensor_core::Tensor;

/// What an operator can consume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Capabilities {
    /// Exactly one input and one output.
    pub one_blob_only: bool,
    /// Implements [`Operator::forward_inplace`].
    pub support_inplace: bool,
    /// Accepts inputs with `elempack > 1`.
    pub support_packing: bool,
    pub support_fp16_storage: bool,
    pub support_bf16_storage: bool,
}

/// One executable graph node.
pub trait Operator: Send + Sync {
    fn kind(&self) -> OpKind;

    /// Layer name from the model description.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Reads this layer's weights. Operators without weights keep the default.
    fn load_model(&mut self, _weights: &WeightStore) -> Result<(), OpError> {
        Ok(())
    }

    /// Chooses kernels for `opt` and prepares derived data.
    fn create_pipeline(&mut self, _opt: &ExecOptions) -> Result<(), OpError> {
        Ok(())
    }

    /// Packing this operator wants for `input`.
    ///
    /// The default packs the logical packed axis as wide as the usable
    /// tiers allow, so every input of a multi-input layer agrees.
    fn preferred_elempack(&self, input: &Tensor, opt: &ExecOptions) -> usize {
        if !self.capabilities().support_packing {
            return 1;
        }
        pick_elempack(input.logical_shape().packed_axis_len(), opt)
    }

    /// Computes the outputs. Inputs arrive in the negotiated packing and
    /// dtype; anything else is handled by the operator's fallback path.
    fn forward(&self, inputs: &[Tensor], opt: &ExecOptions) -> Result<Vec<Tensor>, OpError>;

    /// Overwrites the single input with the output, keeping its shape,
    /// packing and dtype. Called instead of `forward` only when
    /// `support_inplace` and `one_blob_only` are set and the caller holds
    /// the blob's last reference.
    fn forward_inplace(&self, _blob: &mut Tensor, _opt: &ExecOptions) -> Result<(), OpError> {
        Err(OpError::Unsupported(format!("layer '{}' has no in-place forward", self.name())))
    }

    /// `tier:kernel` chosen by `create_pipeline`.
    fn selected_backend(&self) -> String {
        "scalar:reference".to_string()
    }
}

impl fmt::Debug for dyn Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]", self.name(), self.kind(), self.selected_backend())
    }
}

/// Instantiates the built-in implementation of `layer.kind`.
pub fn create_operator(layer: &LayerDef) -> Result<Box<dyn Operator>, OpError> {
    let op: Box<dyn Operator> = match layer.kind {
        OpKind::Input => Box::new(Input::new(layer)),
        OpKind::Convolution => Box::new(Convolution::new(layer)?),
        OpKind::Deconvolution => Box::new(Deconvolution::new(layer)?),
        OpKind::Padding => Box::new(Padding::new(layer)?),
        OpKind::ReLU => Box::new(ReLU::new(layer)?),
        OpKind::Split => Box::new(Split::new(layer)),
        OpKind::Eltwise => Box::new(Eltwise::new(layer)?),
    };
    Ok(op)
}

/// Builds an operator for a layer.
pub type OperatorFactory = Arc<dyn Fn(&LayerDef) -> Result<Box<dyn Operator>, OpError> + Send + Sync>;

/// Operator factories keyed by kind.
///
/// `with_builtin` maps every kind to [`create_operator`]; `register`
/// replaces one kind, e.g. with an instrumented wrapper.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    factories: HashMap<OpKind, OperatorFactory>,
}

impl OperatorRegistry {
    /// A registry with no factories.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for kind in OpKind::ALL {
            registry.register(kind, Arc::new(create_operator));
        }
        registry
    }

    pub fn register(&mut self, kind: OpKind, factory: OperatorFactory) -> &mut Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn contains(&self, kind: OpKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Instantiates `layer` with the factory registered for its kind.
    ///
    /// # Errors
    /// [`OpError::Unsupported`] when no factory is registered.
    pub fn create(&self, layer: &LayerDef) -> Result<Box<dyn Operator>, OpError> {
        let factory = self.factories.get(&layer.kind).ok_or_else(|| {
            OpError::Unsupported(format!("no operator registered for {} (layer '{}')", layer.kind, layer.name))
        })?;
        factory(layer)
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<OpKind> = self.factories.keys().copied().collect();
        kinds.sort();
        f.debug_struct("OperatorRegistry").field("kinds", &kinds).finish()
    }
}

// ── Shared helpers ─────────────────────────────────────────────────

/// The single input of a one-blob operator.
pub(crate) fn single_input<'a>(inputs: &'a [Tensor], name: &str) -> Result<&'a Tensor, OpError> {
    match inputs {
        [one] => Ok(one),
        _ => Err(OpError::Shape(format!(
            "layer '{name}' takes one input, got {}",
            inputs.len()
        ))),
    }
}
