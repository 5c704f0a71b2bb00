use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use iqindex::config::IndexOptions;
use iqindex::hamming::{hamming_32, hamming_naive, knn_hamming};
use iqindex::ivf::IvfIndex;
use iqindex::types::{DESCRIPTOR_SIZE, Descriptor, FeatureSet};
use rand::prelude::*;

fn random_descriptors(rng: &mut StdRng, n: usize) -> Vec<Descriptor> {
    (0..n)
        .map(|_| {
            let mut d = [0u8; DESCRIPTOR_SIZE];
            rng.fill_bytes(&mut d);
            d
        })
        .collect()
}

fn bench_hamming(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hamming");
    let mut rng = StdRng::seed_from_u64(0);
    let mut src = vec![0u8; 32];
    let mut dst = vec![0u8; 8 << 20];
    rng.fill_bytes(&mut src);
    rng.fill_bytes(&mut dst);

    group.throughput(Throughput::Bytes(dst.len() as u64));
    group.bench_function("hamming_32_naive", |b| {
        // NOTE: 这里 32 去掉 black_box 反而更慢
        b.iter(|| {
            dst.chunks_exact(black_box(32))
                .map(|chunk| hamming_naive::<32>(&src, chunk))
                .sum::<u32>()
        });
    });
    group.bench_function("hamming_32_unrolled", |b| {
        b.iter(|| dst.chunks_exact(32).map(|chunk| hamming_32(&src, chunk)).sum::<u32>());
    });
    group.finish();
}

fn bench_hamming_knn(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hamming KNN");
    let mut rng = StdRng::seed_from_u64(1);
    let queries = random_descriptors(&mut rng, 500);
    let codes = random_descriptors(&mut rng, 20_000);
    let k = black_box(3);

    group.throughput(Throughput::Bytes((codes.len() * DESCRIPTOR_SIZE) as u64));
    group.bench_function("single", |b| b.iter(|| knn_hamming::<32>(&queries[0], &codes, k)));
    group.finish();

    let mut group = c.benchmark_group("Query");
    group.sample_size(10);
    group.bench_function("flat", |b| {
        b.iter(|| queries.iter().map(|q| knn_hamming::<32>(q, &codes, k)).collect::<Vec<_>>())
    });

    let sets = codes
        .chunks(500)
        .enumerate()
        .map(|(i, chunk)| FeatureSet::new(format!("obj{i}"), "1", chunk.to_vec()))
        .collect::<Vec<_>>();
    let index = IvfIndex::build(&sets, &IndexOptions::default());
    for nprobe in [1, 8, 32] {
        group.bench_function(format!("ivf_nprobe_{nprobe}"), |b| {
            b.iter(|| queries.iter().map(|q| index.search(q, k, nprobe)).collect::<Vec<_>>())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hamming, bench_hamming_knn);
criterion_main!(benches);
