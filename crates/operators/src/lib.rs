// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # operators
//!
//! Layer implementations and the machinery that picks a kernel for them.
//!
//! # Key Components
//!
//! - [`ExecOptions`]: threads, allocators, storage and packing flags for
//!   one execution.
//! - [`Tier`]: instruction-set tiers, detected once per process and
//!   ordered widest first.
//! - [`DispatchTable`]: per-operator kernel registry keyed by
//!   `(in_elempack, out_elempack, dtype)` and tier.
//! - [`Operator`]: the layer contract (`load_model`, `create_pipeline`,
//!   `forward`) and [`OperatorRegistry`], the factory for layer kinds.
//! - [`ops`]: Input, Convolution, Deconvolution, Padding, ReLU, Split and
//!   Eltwise.
//!
//! # Layer Lifecycle
//!
//! ```text
//!   create_operator(&LayerDef)     parse params
//!         │
//!         ▼
//!   load_model(&WeightStore)       take weights
//!         │
//!         ▼
//!   create_pipeline(&ExecOptions)  select kernel, repack weights
//!         │
//!         ▼
//!   forward(&[Tensor], &ExecOptions) ──► Vec<Tensor>
//! ```
//!
//! A `forward` handed a packing or dtype its kernel was not built for
//! repacks to elempack 1 and runs the reference kernel instead of failing.

mod activation;
mod dispatch;
mod error;
pub mod lanes;
mod operator;
pub mod ops;
mod option;
mod parallel;
mod tier;

pub use activation::Activation;
pub use dispatch::{DispatchTable, KernelEntry, KernelKey, ANY_PACK};
pub use error::{OpError, STATUS_ALLOCATION, STATUS_INVALID, STATUS_OK, STATUS_SHAPE, STATUS_UNSUPPORTED};
pub use operator::{create_operator, Capabilities, Operator, OperatorFactory, OperatorRegistry};
pub use ops::describe_kernels;
pub use option::{default_threads, ExecOptions};
pub use parallel::for_each_group;
pub use tier::{pick_elempack, sort_by_preference, Tier};
