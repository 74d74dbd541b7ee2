// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for packing conversion and storage casts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use memory_manager::PoolAllocator;
use tensor_core::{cast, convert_packing, DType, Shape, Tensor};

fn feature_map(c: usize) -> Tensor {
    let values: Vec<f32> = (0..56 * 56 * c).map(|i| (i % 251) as f32 * 0.01).collect();
    Tensor::from_f32(Shape::d3(56, 56, c), &values).unwrap()
}

fn bench_convert_packing(c: &mut Criterion) {
    let pool = PoolAllocator::unbounded();
    let src = feature_map(64);
    let mut group = c.benchmark_group("convert_packing");
    for pack in [4usize, 8, 16] {
        group.bench_with_input(BenchmarkId::new("pack1_to", pack), &pack, |b, &pack| {
            b.iter(|| convert_packing(black_box(&src), pack, Some(&pool)).unwrap())
        });
        let packed = convert_packing(&src, pack, None).unwrap();
        group.bench_with_input(BenchmarkId::new("to_pack1_from", pack), &pack, |b, _| {
            b.iter(|| convert_packing(black_box(&packed), 1, Some(&pool)).unwrap())
        });
    }
    group.finish();
}

fn bench_cast(c: &mut Criterion) {
    let pool = PoolAllocator::unbounded();
    let src = feature_map(32);
    c.bench_function("cast_f32_to_f16", |b| {
        b.iter(|| cast(black_box(&src), DType::F16, Some(&pool)).unwrap())
    });
}

criterion_group!(benches, bench_convert_packing, bench_cast);
criterion_main!(benches);
