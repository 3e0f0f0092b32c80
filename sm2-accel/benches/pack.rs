//! Packing and software accelerator benchmarks

use core::hint::black_box;
use criterion::{
    BenchmarkGroup, Criterion, criterion_group, criterion_main, measurement::Measurement,
};
use sm2_accel::{
    gateway::{Accelerator, SoftwareAccelerator},
    lifecycle::SELF_TEST_VECTORS,
    pack::{WORDS_PER_RECORD, pack_batch},
    pool::BufferPool,
};

const BATCH: usize = 1024;

fn columns() -> (Vec<&'static [u8]>, Vec<[u8; 32]>, Vec<[u8; 32]>) {
    let vectors = SELF_TEST_VECTORS.into_iter().cycle().take(BATCH);
    (
        vectors.clone().map(|v| v.signature).collect(),
        vectors.clone().map(|v| v.digest).collect(),
        vectors.map(|v| v.public_key_x).collect(),
    )
}

fn bench_pack_batch<M: Measurement>(group: &mut BenchmarkGroup<'_, M>) {
    let (signatures, digests, xs) = columns();
    let pool = BufferPool::new();
    group.bench_function("pack_batch_1024", |b| {
        b.iter(|| {
            let mut words = pool.acquire(BATCH).unwrap();
            pack_batch(black_box(&signatures), &digests, &xs, &mut words).unwrap();
            black_box(words[0])
        })
    });
}

fn bench_software_kernel<M: Measurement>(group: &mut BenchmarkGroup<'_, M>) {
    let (signatures, digests, xs) = columns();
    let mut words = vec![0u32; 16 * WORDS_PER_RECORD];
    pack_batch(&signatures[..16], &digests[..16], &xs[..16], &mut words).unwrap();
    let kernel = SoftwareAccelerator::new();
    let mut status = [0u8; 16];
    group.bench_function("software_kernel_16", |b| {
        b.iter(|| kernel.batch_verify(black_box(&words), &mut status))
    });
}

fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");
    bench_pack_batch(&mut group);
    bench_software_kernel(&mut group);
    group.finish();
}

criterion_group!(benches, bench_pack);
criterion_main!(benches);
