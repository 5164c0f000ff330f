//! Benchmarks for the column primitives on the host-simulated device.
//!
//! Run with:  `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gpu_column_engine::{allocate_like, copy, empty_like, Column, CopyEngine, DType, Device, MemoryConfig, TypeMetadata};

fn make_column(device: &Device, rows: usize) -> Column {
    let bytes = vec![0x5au8; rows * 8];
    let valid = vec![true; rows];
    let column = Column::from_host(
        device,
        gpu_column_engine::Stream::DEFAULT,
        DType::Int64,
        TypeMetadata::default(),
        &bytes,
        Some(valid.as_slice()),
    )
    .unwrap();
    device.synchronize(gpu_column_engine::Stream::DEFAULT).unwrap();
    column
}

fn bench_empty_like(c: &mut Criterion) {
    let device = Device::host(MemoryConfig::default()).unwrap();
    let column = make_column(&device, 1024);

    c.bench_function("empty_like", |b| {
        b.iter(|| {
            let shape = empty_like(black_box(&column)).unwrap();
            black_box(shape);
        })
    });
}

fn bench_allocate_like(c: &mut Criterion) {
    let device = Device::host(MemoryConfig::default()).unwrap();
    let stream = device.create_stream().unwrap();
    let column = make_column(&device, 64 * 1024);

    // Pooled slabs are reused once the first iteration has returned them.
    c.bench_function("allocate_like_64k_int64", |b| {
        b.iter(|| {
            let scratch = allocate_like(black_box(&column), &device, stream).unwrap();
            black_box(scratch);
        })
    });
}

fn bench_copy(c: &mut Criterion) {
    let device = Device::host(MemoryConfig::default()).unwrap();
    let stream = device.create_stream().unwrap();
    let column = make_column(&device, 64 * 1024);

    c.bench_function("copy_64k_int64_and_sync", |b| {
        b.iter(|| {
            let duplicate = copy(black_box(&column), &device, stream).unwrap();
            device.synchronize(stream).unwrap();
            black_box(duplicate);
        })
    });
}

criterion_group!(benches, bench_empty_like, bench_allocate_like, bench_copy);
criterion_main!(benches);
