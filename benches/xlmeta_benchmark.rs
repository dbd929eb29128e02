//! Benchmarks for xl.meta mutation and lookup at increasing version counts.

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use minio_xlmeta::{
    open_indexed, ChecksumAlgo, ChecksumInfo, ErasureAlgo, ErasureInfo, FileInfo, ObjectPartInfo,
    Uuid16, XlMetaV2,
};

const SIZES: [usize; 4] = [1, 10, 1000, 100_000];

fn uuid(tag: u8, i: usize) -> Uuid16 {
    let mut b = [0u8; 16];
    b[0] = tag;
    b[8..].copy_from_slice(&(i as u64).to_be_bytes());
    Uuid16(b)
}

fn version(i: usize) -> FileInfo {
    let mut metadata = HashMap::new();
    metadata.insert("etag".to_string(), "d41d8cd98f00b204e9800998ecf8427e".to_string());
    metadata.insert("content-type".to_string(), "application/octet-stream".to_string());
    metadata.insert("x-minio-internal-inline-data".to_string(), "true".to_string());

    FileInfo {
        version_id: uuid(1, i),
        data_dir: uuid(2, i),
        mod_time: 1_700_000_000_000_000_000 - i as i64,
        size: 1_234_456,
        metadata,
        parts: vec![ObjectPartInfo {
            number: 1,
            size: 1_234_456,
            actual_size: 1_234_456,
            etag: String::new(),
        }],
        erasure: ErasureInfo {
            algorithm: ErasureAlgo::ReedSolomon,
            data_blocks: 4,
            parity_blocks: 2,
            block_size: 10_000,
            index: 1,
            distribution: vec![1, 2, 3, 4, 5, 6],
            checksums: vec![ChecksumInfo {
                part_number: 1,
                algorithm: ChecksumAlgo::HighwayHash256S,
                hash: None,
            }],
        },
        ..Default::default()
    }
}

fn build(n: usize) -> XlMetaV2 {
    let mut meta = XlMetaV2::new();
    for i in 0..n {
        meta.add_version(&version(i)).unwrap();
    }
    meta
}

/// Benchmark container mutations.
fn bench_mutations(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutations");
    group.sample_size(10);

    for &n in SIZES.iter() {
        let meta = build(n);
        let target = version(n / 2);

        group.bench_with_input(BenchmarkId::new("add_version", n), &n, |b, &n| {
            b.iter_with_setup(
                || meta.clone(),
                |mut meta| {
                    meta.add_version(&version(n + 1)).unwrap();
                    black_box(meta)
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("update_object_version", n), &n, |b, _| {
            let mut update = target.clone();
            update.mod_time += 7;
            b.iter_with_setup(
                || meta.clone(),
                |mut meta| {
                    meta.update_object_version(&update).unwrap();
                    black_box(meta)
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("delete_version", n), &n, |b, _| {
            b.iter_with_setup(
                || meta.clone(),
                |mut meta| {
                    black_box(meta.delete_version(&target).unwrap());
                    meta
                },
            );
        });
    }

    group.finish();
}

/// Benchmark lookups on the container and on the indexed view.
fn bench_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookups");
    group.sample_size(10);

    for &n in SIZES.iter() {
        let meta = build(n);
        let buf = meta.serialize().unwrap();
        let id = uuid(1, n / 2).to_uuid_string();

        group.bench_with_input(BenchmarkId::new("to_file_info", n), &n, |b, _| {
            b.iter(|| black_box(meta.to_file_info("bucket", "object", &id, false, false).unwrap()));
        });

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("list_versions", n), &n, |b, _| {
            b.iter(|| black_box(meta.list_versions("bucket", "object", false).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("indexed_to_file_info", n), &n, |b, _| {
            b.iter(|| {
                let view = open_indexed(&buf).unwrap().0.unwrap();
                black_box(view.to_file_info("bucket", "object", &id, false).unwrap())
            });
        });

        group.bench_with_input(BenchmarkId::new("indexed_list_versions", n), &n, |b, _| {
            b.iter(|| {
                let view = open_indexed(&buf).unwrap().0.unwrap();
                black_box(view.list_versions("bucket", "object", false).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark load and serialize.
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.sample_size(10);

    for &n in SIZES.iter() {
        let meta = build(n);
        let buf = meta.serialize().unwrap();
        group.throughput(Throughput::Bytes(buf.len() as u64));

        group.bench_with_input(BenchmarkId::new("load", n), &buf, |b, buf| {
            b.iter(|| black_box(XlMetaV2::load(buf).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("serialize", n), &n, |b, _| {
            b.iter(|| black_box(meta.serialize().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mutations, bench_lookups, bench_codec);
criterion_main!(benches);
