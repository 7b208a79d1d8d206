//! Manifest path benchmarks
//!
//! Run with: `cargo bench --bench manifest_paths`
//!
//! Every cycle serializes one manifest, and every cycle that persists
//! lists the cluster prefix and filters it for orphans. Bootstrap parses
//! the version out of every listed key.

use cloud_metadata_sync::manifest::{keys, ClusterManifest, ClusterUuid, LogOffset};
use cloud_metadata_sync::uploader::compute_orphans;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn cluster() -> ClusterUuid {
    ClusterUuid::parse("bench-cluster").expect("static uuid is valid")
}

fn manifest(version: u64, offset: i64) -> ClusterManifest {
    let mut manifest = ClusterManifest::new(cluster());
    for _ in 0..=version {
        manifest.advance_version();
    }
    manifest.record_snapshot(keys::snapshot_key(&cluster(), LogOffset(offset)), LogOffset(offset));
    manifest
}

/// Listing with `versions` manifests and as many snapshots
fn listing(versions: u64) -> Vec<String> {
    let uuid = cluster();
    let mut keys: Vec<String> = (0..versions)
        .map(|v| keys::manifest_key(&uuid, v))
        .chain((1..=versions).map(|o| keys::snapshot_key(&uuid, LogOffset(o as i64 * 100))))
        .collect();
    keys.sort();
    keys
}

fn bench_manifest_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("manifest_codec");
    group.throughput(Throughput::Elements(1));

    let m = manifest(41, 4_200);
    let encoded = m.to_json().expect("manifest encodes");
    let uuid = cluster();

    group.bench_function("encode", |b| b.iter(|| black_box(&m).to_json()));
    group.bench_function("decode_for", |b| {
        b.iter(|| ClusterManifest::decode_for(black_box(&uuid), black_box(&encoded)))
    });

    group.finish();
}

fn bench_parse_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_manifest_version");

    for count in [16u64, 256, 4096] {
        let keys_listed = listing(count);
        let uuid = cluster();
        group.throughput(Throughput::Elements(keys_listed.len() as u64));
        group.bench_function(format!("keys_{}", keys_listed.len()), |b| {
            b.iter(|| {
                keys_listed
                    .iter()
                    .filter_map(|k| keys::parse_manifest_version(black_box(&uuid), k))
                    .max()
            })
        });
    }

    group.finish();
}

fn bench_compute_orphans(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_orphans");

    for count in [16u64, 256, 4096] {
        let keys_listed = listing(count);
        let committed = manifest(count - 1, count as i64 * 100);
        group.throughput(Throughput::Elements(keys_listed.len() as u64));
        group.bench_function(format!("keys_{}", keys_listed.len()), |b| {
            b.iter(|| compute_orphans(black_box(&committed), black_box(&keys_listed)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_manifest_codec,
    bench_parse_keys,
    bench_compute_orphans,
);

criterion_main!(benches);
