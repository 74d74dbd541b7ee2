// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Logical tensor extents.
//!
//! A [`Shape`] names up to four extents, innermost first: width `w`,
//! height `h`, depth `d` and channels `c`. Unused extents are 1. The rank
//! decides which extent is the *packed axis*, the one whose lanes are
//! interleaved when a tensor is stored with `elempack > 1`:
//!
//! ```text
//! rank 1  [w]            packed axis: w
//! rank 2  [w, h]         packed axis: h
//! rank 3  [w, h, c]      packed axis: c
//! rank 4  [w, h, d, c]   packed axis: c
//! ```

use std::fmt;

/// Logical extents of a tensor, independent of its packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    rank: usize,
    w: usize,
    h: usize,
    d: usize,
    c: usize,
}

impl Shape {
    /// The shape of an empty tensor.
    pub const fn empty() -> Self {
        Self {
            rank: 0,
            w: 0,
            h: 0,
            d: 0,
            c: 0,
        }
    }

    pub const fn d1(w: usize) -> Self {
        Self { rank: 1, w, h: 1, d: 1, c: 1 }
    }

    pub const fn d2(w: usize, h: usize) -> Self {
        Self { rank: 2, w, h, d: 1, c: 1 }
    }

    pub const fn d3(w: usize, h: usize, c: usize) -> Self {
        Self { rank: 3, w, h, d: 1, c }
    }

    pub const fn d4(w: usize, h: usize, d: usize, c: usize) -> Self {
        Self { rank: 4, w, h, d, c }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn w(&self) -> usize {
        self.w
    }

    pub fn h(&self) -> usize {
        self.h
    }

    pub fn d(&self) -> usize {
        self.d
    }

    pub fn c(&self) -> usize {
        self.c
    }

    pub fn is_empty(&self) -> bool {
        self.rank == 0 || self.num_elements() == 0
    }

    /// Total scalar count (0 for the empty shape).
    pub fn num_elements(&self) -> usize {
        if self.rank == 0 {
            return 0;
        }
        self.w * self.h * self.d * self.c
    }

    /// Length of the packed axis (see the module docs).
    pub fn packed_axis_len(&self) -> usize {
        match self.rank {
            0 => 0,
            1 => self.w,
            2 => self.h,
            _ => self.c,
        }
    }

    /// Scalars per step along the packed axis: everything inside it.
    pub fn inner_len(&self) -> usize {
        match self.rank {
            0 => 0,
            1 => 1,
            2 => self.w,
            _ => self.w * self.h * self.d,
        }
    }

    /// Returns a copy with the packed axis replaced by `len`.
    pub fn with_packed_axis(&self, len: usize) -> Self {
        let mut s = *self;
        match self.rank {
            0 => {}
            1 => s.w = len,
            2 => s.h = len,
            _ => s.c = len,
        }
        s
    }

    /// Extents as written in model files, innermost first.
    pub fn to_vec(&self) -> Vec<usize> {
        match self.rank {
            0 => vec![],
            1 => vec![self.w],
            2 => vec![self.w, self.h],
            3 => vec![self.w, self.h, self.c],
            _ => vec![self.w, self.h, self.d, self.c],
        }
    }
}

impl Default for Shape {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, extent) in self.to_vec().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{extent}")?;
        }
        write!(f, "]")
    }
}

/// `[w]`, `[w, h]`, `[w, h, c]` or `[w, h, d, c]`; anything else is empty.
impl From<&[usize]> for Shape {
    fn from(extents: &[usize]) -> Self {
        match *extents {
            [w] => Shape::d1(w),
            [w, h] => Shape::d2(w, h),
            [w, h, c] => Shape::d3(w, h, c),
            [w, h, d, c] => Shape::d4(w, h, d, c),
            _ => Shape::empty(),
        }
    }
}

impl From<Vec<usize>> for Shape {
    fn from(extents: Vec<usize>) -> Self {
        Shape::from(extents.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_shape() {
        let s = Shape::empty();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), 0);
        assert!(s.is_empty());
        assert_eq!(s.packed_axis_len(), 0);
    }

    #[test]
    fn test_packed_axis_by_rank() {
        assert_eq!(Shape::d1(12).packed_axis_len(), 12);
        assert_eq!(Shape::d2(5, 8).packed_axis_len(), 8);
        assert_eq!(Shape::d3(5, 6, 16).packed_axis_len(), 16);
        assert_eq!(Shape::d4(5, 6, 7, 4).packed_axis_len(), 4);
    }

    #[test]
    fn test_inner_len() {
        assert_eq!(Shape::d1(12).inner_len(), 1);
        assert_eq!(Shape::d2(5, 8).inner_len(), 5);
        assert_eq!(Shape::d4(5, 6, 7, 4).inner_len(), 210);
    }

    #[test]
    fn test_with_packed_axis() {
        assert_eq!(Shape::d3(4, 4, 3).with_packed_axis(8), Shape::d3(4, 4, 8));
        assert_eq!(Shape::d2(4, 3).with_packed_axis(1), Shape::d2(4, 1));
    }

    #[test]
    fn test_from_extents() {
        assert_eq!(Shape::from(vec![3]), Shape::d1(3));
        assert_eq!(Shape::from(&[2, 3, 4][..]), Shape::d3(2, 3, 4));
        assert_eq!(Shape::from(vec![1, 2, 3, 4]).d(), 3);
        assert!(Shape::from(vec![1, 2, 3, 4, 5]).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::d3(8, 8, 3).to_string(), "[8, 8, 3]");
        assert_eq!(Shape::empty().to_string(), "[]");
    }
}
