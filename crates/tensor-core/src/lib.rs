// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Packed tensor storage for the inference runtime.
//!
//! This crate provides:
//! - [`Tensor`]: a reference-counted buffer of up to four extents whose
//!   packed axis is stored in groups of 1, 4, 8 or 16 lanes.
//! - [`Shape`]: logical extents `(w, h, d, c)` and the packed-axis rules.
//! - [`DType`]: lane storage types (f32, f16, bf16, i8).
//! - [`convert_packing`]: exact regrouping between lane widths.
//! - [`cast`]: lane storage conversion.
//!
//! # Design Goals
//! - Shallow copies; writes require unique ownership.
//! - Every buffer comes from a [`memory_manager::Allocator`], so blob and
//!   scratch memory can be pooled and budgeted.
//! - Layout conversions are byte-exact and dtype-agnostic.

mod cast;
mod dtype;
mod error;
mod packing;
mod shape;
mod tensor;

pub use cast::cast;
pub use dtype::DType;
pub use error::TensorError;
pub use packing::convert_packing;
pub use shape::Shape;
pub use tensor::{is_valid_elempack, Tensor};
