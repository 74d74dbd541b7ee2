// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-operator kernel tables.
//!
//! Each operator keeps one [`DispatchTable`] built at first use. A kernel
//! is registered under a [`KernelKey`] (input packing, output packing,
//! dtype) and the [`Tier`] whose instructions it executes. Selection walks
//! the caller's tiers in preference order and returns the first kernel
//! whose key matches, so a wider tier always wins over a narrower one.
//!
//! ```text
//!   select(key{in:4, out:8, f32}, [avx2, sse2, scalar])
//!        avx2   → in:4 out:8 f32   ✓  returned
//!        sse2   → (not reached)
//! ```

use crate::Tier;
use model_ir::OpKind;
use tensor_core::DType;

/// Matches any packing in a [`KernelKey`].
pub const ANY_PACK: usize = 0;

/// What a kernel consumes and produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub in_elempack: usize,
    pub out_elempack: usize,
    pub dtype: DType,
}

impl KernelKey {
    pub fn new(in_elempack: usize, out_elempack: usize, dtype: DType) -> Self {
        Self {
            in_elempack,
            out_elempack,
            dtype,
        }
    }

    /// Whether a registered key serves the requested `other`.
    fn serves(&self, other: &KernelKey) -> bool {
        let pack_ok = |mine: usize, want: usize| mine == ANY_PACK || mine == want;
        self.dtype == other.dtype
            && pack_ok(self.in_elempack, other.in_elempack)
            && pack_ok(self.out_elempack, other.out_elempack)
    }
}

/// One registered kernel.
#[derive(Debug, Clone, Copy)]
pub struct KernelEntry<F> {
    pub key: KernelKey,
    pub tier: Tier,
    pub name: &'static str,
    pub kernel: F,
}

impl<F> KernelEntry<F> {
    /// `tier:name`, as reported by operators.
    pub fn label(&self) -> String {
        format!("{}:{}", self.tier, self.name)
    }
}

/// Kernels registered for one operator kind.
pub struct DispatchTable<F: Copy> {
    kind: OpKind,
    entries: Vec<KernelEntry<F>>,
}

impl<F: Copy> DispatchTable<F> {
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, key: KernelKey, tier: Tier, name: &'static str, kernel: F) -> &mut Self {
        self.entries.push(KernelEntry { key, tier, name, kernel });
        self
    }

    /// First kernel matching `key`, trying `tiers` in order.
    pub fn select(&self, key: &KernelKey, tiers: &[Tier]) -> Option<&KernelEntry<F>> {
        let found = tiers.iter().find_map(|tier| {
            self.entries
                .iter()
                .find(|e| e.tier == *tier && e.key.serves(key))
        });
        match found {
            Some(e) => tracing::trace!("{}: {:?} → {}", self.kind, key, e.label()),
            None => tracing::debug!("{}: no kernel for {:?} among {:?}", self.kind, key, tiers),
        }
        found
    }

    pub fn entries(&self) -> &[KernelEntry<F>] {
        &self.entries
    }

    /// One line per entry, for inspection.
    pub fn describe(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{} {:<7} in={} out={} {}  {}",
                    self.kind,
                    e.tier.as_str(),
                    pack_label(e.key.in_elempack),
                    pack_label(e.key.out_elempack),
                    e.key.dtype,
                    e.name
                )
            })
            .collect()
    }
}

fn pack_label(p: usize) -> String {
    if p == ANY_PACK {
        "*".to_string()
    } else {
        p.to_string()
    }
}
