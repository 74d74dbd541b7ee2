// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Vector lanes for packed kernels.
//!
//! Kernels are written once against [`Lanes`] and instantiated per tier:
//!
//! | type             | tier    | lanes |
//! |------------------|---------|-------|
//! | `ScalarLanes<N>` | scalar  | N     |
//! | `SseLanes`       | sse2    | 4     |
//! | `NeonLanes`      | neon    | 4     |
//! | `AvxLanes`       | avx2    | 8     |
//! | `Avx512Lanes`    | avx512  | 16    |
//!
//! Intrinsic-backed methods are `#[inline(always)]` so they compile into
//! the `#[target_feature]` entry point of the kernel that uses them.

/// A register of `N` f32 lanes.
///
/// # Safety
/// Every method may execute instructions of the implementor's tier; callers
/// must only use an implementation after the tier was detected. `load` and
/// `store` access `N` consecutive f32s through unaligned pointers, which
/// must be valid for that range.
pub unsafe trait Lanes: Copy {
    const N: usize;

    unsafe fn zero() -> Self;
    unsafe fn splat(v: f32) -> Self;
    unsafe fn load(ptr: *const f32) -> Self;
    unsafe fn store(self, ptr: *mut f32);
    /// `a * b + c`.
    unsafe fn fmadd(a: Self, b: Self, c: Self) -> Self;
    unsafe fn add(a: Self, b: Self) -> Self;
    unsafe fn mul(a: Self, b: Self) -> Self;
    unsafe fn max(a: Self, b: Self) -> Self;
    unsafe fn min(a: Self, b: Self) -> Self;
}

// ── Portable ───────────────────────────────────────────────────────

/// Portable lanes, one array slot per lane.
#[derive(Debug, Clone, Copy)]
pub struct ScalarLanes<const W: usize>([f32; W]);

impl<const W: usize> ScalarLanes<W> {
    #[inline(always)]
    fn map2(a: Self, b: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let mut out = [0.0; W];
        for i in 0..W {
            out[i] = f(a.0[i], b.0[i]);
        }
        Self(out)
    }
}

unsafe impl<const W: usize> Lanes for ScalarLanes<W> {
    const N: usize = W;

    #[inline(always)]
    unsafe fn zero() -> Self {
        Self([0.0; W])
    }

    #[inline(always)]
    unsafe fn splat(v: f32) -> Self {
        Self([v; W])
    }

    #[inline(always)]
    unsafe fn load(ptr: *const f32) -> Self {
        let mut out = [0.0; W];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = ptr.add(i).read_unaligned();
        }
        Self(out)
    }

    #[inline(always)]
    unsafe fn store(self, ptr: *mut f32) {
        for (i, v) in self.0.iter().enumerate() {
            ptr.add(i).write_unaligned(*v);
        }
    }

    #[inline(always)]
    unsafe fn fmadd(a: Self, b: Self, c: Self) -> Self {
        let mut out = c.0;
        for i in 0..W {
            out[i] += a.0[i] * b.0[i];
        }
        Self(out)
    }

    #[inline(always)]
    unsafe fn add(a: Self, b: Self) -> Self {
        Self::map2(a, b, |x, y| x + y)
    }

    #[inline(always)]
    unsafe fn mul(a: Self, b: Self) -> Self {
        Self::map2(a, b, |x, y| x * y)
    }

    #[inline(always)]
    unsafe fn max(a: Self, b: Self) -> Self {
        Self::map2(a, b, f32::max)
    }

    #[inline(always)]
    unsafe fn min(a: Self, b: Self) -> Self {
        Self::map2(a, b, f32::min)
    }
}

// ── x86-64 ─────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
pub use x86::{AvxLanes, SseLanes};

#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
pub use x86::Avx512Lanes;

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::Lanes;
    use std::arch::x86_64::*;

    #[derive(Clone, Copy)]
    pub struct SseLanes(__m128);

    unsafe impl Lanes for SseLanes {
        const N: usize = 4;

        #[inline(always)]
        unsafe fn zero() -> Self {
            Self(_mm_setzero_ps())
        }
        #[inline(always)]
        unsafe fn splat(v: f32) -> Self {
            Self(_mm_set1_ps(v))
        }
        #[inline(always)]
        unsafe fn load(ptr: *const f32) -> Self {
            Self(_mm_loadu_ps(ptr))
        }
        #[inline(always)]
        unsafe fn store(self, ptr: *mut f32) {
            _mm_storeu_ps(ptr, self.0)
        }
        // SSE2 has no fused multiply-add.
        #[inline(always)]
        unsafe fn fmadd(a: Self, b: Self, c: Self) -> Self {
            Self(_mm_add_ps(_mm_mul_ps(a.0, b.0), c.0))
        }
        #[inline(always)]
        unsafe fn add(a: Self, b: Self) -> Self {
            Self(_mm_add_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn mul(a: Self, b: Self) -> Self {
            Self(_mm_mul_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn max(a: Self, b: Self) -> Self {
            Self(_mm_max_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn min(a: Self, b: Self) -> Self {
            Self(_mm_min_ps(a.0, b.0))
        }
    }

    #[derive(Clone, Copy)]
    pub struct AvxLanes(__m256);

    unsafe impl Lanes for AvxLanes {
        const N: usize = 8;

        #[inline(always)]
        unsafe fn zero() -> Self {
            Self(_mm256_setzero_ps())
        }
        #[inline(always)]
        unsafe fn splat(v: f32) -> Self {
            Self(_mm256_set1_ps(v))
        }
        #[inline(always)]
        unsafe fn load(ptr: *const f32) -> Self {
            Self(_mm256_loadu_ps(ptr))
        }
        #[inline(always)]
        unsafe fn store(self, ptr: *mut f32) {
            _mm256_storeu_ps(ptr, self.0)
        }
        #[inline(always)]
        unsafe fn fmadd(a: Self, b: Self, c: Self) -> Self {
            Self(_mm256_fmadd_ps(a.0, b.0, c.0))
        }
        #[inline(always)]
        unsafe fn add(a: Self, b: Self) -> Self {
            Self(_mm256_add_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn mul(a: Self, b: Self) -> Self {
            Self(_mm256_mul_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn max(a: Self, b: Self) -> Self {
            Self(_mm256_max_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn min(a: Self, b: Self) -> Self {
            Self(_mm256_min_ps(a.0, b.0))
        }
    }

    #[cfg(feature = "avx512")]
    #[derive(Clone, Copy)]
    pub struct Avx512Lanes(__m512);

    #[cfg(feature = "avx512")]
    unsafe impl Lanes for Avx512Lanes {
        const N: usize = 16;

        #[inline(always)]
        unsafe fn zero() -> Self {
            Self(_mm512_setzero_ps())
        }
        #[inline(always)]
        unsafe fn splat(v: f32) -> Self {
            Self(_mm512_set1_ps(v))
        }
        #[inline(always)]
        unsafe fn load(ptr: *const f32) -> Self {
            Self(_mm512_loadu_ps(ptr))
        }
        #[inline(always)]
        unsafe fn store(self, ptr: *mut f32) {
            _mm512_storeu_ps(ptr, self.0)
        }
        #[inline(always)]
        unsafe fn fmadd(a: Self, b: Self, c: Self) -> Self {
            Self(_mm512_fmadd_ps(a.0, b.0, c.0))
        }
        #[inline(always)]
        unsafe fn add(a: Self, b: Self) -> Self {
            Self(_mm512_add_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn mul(a: Self, b: Self) -> Self {
            Self(_mm512_mul_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn max(a: Self, b: Self) -> Self {
            Self(_mm512_max_ps(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn min(a: Self, b: Self) -> Self {
            Self(_mm512_min_ps(a.0, b.0))
        }
    }
}

// ── AArch64 ────────────────────────────────────────────────────────

#[cfg(target_arch = "aarch64")]
pub use arm::NeonLanes;

#[cfg(target_arch = "aarch64")]
mod arm {
    use super::Lanes;
    use std::arch::aarch64::*;

    #[derive(Clone, Copy)]
    pub struct NeonLanes(float32x4_t);

    unsafe impl Lanes for NeonLanes {
        const N: usize = 4;

        #[inline(always)]
        unsafe fn zero() -> Self {
            Self(vdupq_n_f32(0.0))
        }
        #[inline(always)]
        unsafe fn splat(v: f32) -> Self {
            Self(vdupq_n_f32(v))
        }
        #[inline(always)]
        unsafe fn load(ptr: *const f32) -> Self {
            Self(vld1q_f32(ptr))
        }
        #[inline(always)]
        unsafe fn store(self, ptr: *mut f32) {
            vst1q_f32(ptr, self.0)
        }
        #[inline(always)]
        unsafe fn fmadd(a: Self, b: Self, c: Self) -> Self {
            Self(vfmaq_f32(c.0, a.0, b.0))
        }
        #[inline(always)]
        unsafe fn add(a: Self, b: Self) -> Self {
            Self(vaddq_f32(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn mul(a: Self, b: Self) -> Self {
            Self(vmulq_f32(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn max(a: Self, b: Self) -> Self {
            Self(vmaxq_f32(a.0, b.0))
        }
        #[inline(always)]
        unsafe fn min(a: Self, b: Self) -> Self {
            Self(vminq_f32(a.0, b.0))
        }
    }
}
