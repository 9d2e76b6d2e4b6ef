//! Benchmarks for the deletion guard index and mount-table parsing
//!
//! Both run once per pass over every claim or mount in the cluster.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::collections::BTreeSet;
use storage_lifecycle_operator::drain::raw_block_targets;
use storage_lifecycle_operator::drain::RAW_BLOCK_MARKER;
use storage_lifecycle_operator::reconcile::UsageIndex;
use storage_lifecycle_operator::Consumer;

fn consumers(count: usize, classes: usize) -> Vec<Consumer> {
    (0..count)
        .map(|i| Consumer {
            kind: "PersistentVolumeClaim".to_string(),
            name: format!("ns-{}/claim-{}", i % 50, i),
            phase: Some(if i % 7 == 0 { "Released" } else { "Bound" }.to_string()),
            reference: (i % 11 != 0).then(|| format!("class-{}", i % classes)),
        })
        .collect()
}

fn bench_usage_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("usage_index");

    let candidates: BTreeSet<String> = (0..100).map(|i| format!("class-{}", i)).collect();
    let claims = consumers(10_000, 200);
    group.throughput(Throughput::Elements(claims.len() as u64));

    group.bench_function("build_10k_claims", |b| {
        b.iter(|| UsageIndex::build(black_box(&candidates), black_box(&claims)));
    });

    group.finish();
}

fn bench_mount_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount_table");

    let mut table = String::new();
    for i in 0..2_000 {
        if i % 4 == 0 {
            table.push_str(&format!(
                "devtmpfs /var/lib/kubelet/plugins/kubernetes.io/csi/volumeDevices/publish/pvc-{}/pod devtmpfs rw 0 0\n",
                i
            ));
        } else {
            table.push_str(&format!(
                "/dev/sd{} /var/lib/kubelet/pods/p{}/volumes/kubernetes.io~csi/pvc-{}/mount ext4 rw 0 0\n",
                i % 26,
                i,
                i
            ));
        }
    }
    group.throughput(Throughput::Bytes(table.len() as u64));

    group.bench_function("raw_block_targets_2k_lines", |b| {
        b.iter(|| raw_block_targets(black_box(&table), RAW_BLOCK_MARKER));
    });

    group.finish();
}

criterion_group!(benches, bench_usage_index, bench_mount_table);
criterion_main!(benches);
