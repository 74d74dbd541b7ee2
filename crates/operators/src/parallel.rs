// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-channel-group parallel loops.
//!
//! Output tensors are split into disjoint channel groups (one `cstep`
//! slice each), so every worker writes its own range and no locking is
//! needed. The loop honours `num_threads` from the execution options by
//! running inside a dedicated rayon pool of that size.

use rayon::prelude::*;

/// Calls `f(group_index, group)` for each `group_len` chunk of `out`.
///
/// Runs on the calling thread when `num_threads <= 1` or there is a single
/// group. A pool that cannot be built degrades to the serial loop.
pub fn for_each_group<T, F>(out: &mut [T], group_len: usize, num_threads: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    if group_len == 0 || out.is_empty() {
        return;
    }
    let groups = out.len().div_ceil(group_len);
    if num_threads <= 1 || groups == 1 {
        out.chunks_mut(group_len).enumerate().for_each(|(q, g)| f(q, g));
        return;
    }

    match rayon::ThreadPoolBuilder::new().num_threads(num_threads.min(groups)).build() {
        Ok(pool) => pool.install(|| {
            out.par_chunks_mut(group_len).enumerate().for_each(|(q, g)| f(q, g));
        }),
        Err(e) => {
            tracing::warn!("could not build a {num_threads}-thread pool ({e}); running serially");
            out.chunks_mut(group_len).enumerate().for_each(|(q, g)| f(q, g));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_are_disjoint_and_complete() {
        for threads in [1, 2, 4] {
            let mut out = vec![0usize; 10 * 7];
            for_each_group(&mut out, 7, threads, |q, g| {
                for v in g.iter_mut() {
                    *v += q + 1;
                }
            });
            for (i, v) in out.iter().enumerate() {
                assert_eq!(*v, i / 7 + 1, "threads={threads}");
            }
        }
    }

    #[test]
    fn test_empty_is_noop() {
        let mut out: Vec<f32> = Vec::new();
        for_each_group(&mut out, 4, 4, |_, _| panic!("called on empty"));
    }
}
