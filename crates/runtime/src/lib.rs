// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Loads a model into a [`Net`] and evaluates blobs on demand through an
//! [`Extractor`].
//!
//! The runtime takes:
//! - A validated `ModelGraph` and its `WeightStore` from `model-ir`.
//! - One `Operator` per layer from `operators`, prepared for an
//!   `ExecOptions`.
//! - Blob and workspace allocators from `memory-manager`.
//!
//! # Threading
//! A `Net` is immutable once loaded and is `Send + Sync`; any number of
//! extractors may run over it at once, each on its own thread. Parallelism
//! inside a layer comes from the operator's per-channel thread pool.
//!
//! # Example
//! ```no_run
//! use runtime::{Net, RuntimeConfig};
//! use tensor_core::{Shape, Tensor};
//!
//! # fn example() -> Result<(), runtime::RuntimeError> {
//! let net = RuntimeConfig::from_file("packrt.toml".as_ref())?.load_net()?;
//! let mut ex = net.create_extractor();
//! ex.input("data", Tensor::from_f32(Shape::d3(32, 32, 3), &vec![0.0; 3072])?)?;
//! let out = ex.extract("prob")?;
//! println!("{} -> {}", out.logical_shape(), ex.metrics().summary());
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod extractor;
mod metrics;
mod net;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use extractor::Extractor;
pub use metrics::{ExtractMetrics, LayerMetrics};
pub use net::Net;
