//! Benchmarks for tree assembly and reconstruction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use lineageflow::archive::InMemoryArchive;
use lineageflow::channel::DurableChannel;
use lineageflow::config::{ChannelConfig, RetraceConfig};
use lineageflow::core::LineageTree;
use lineageflow::retrace::TraceReconstructor;
use lineageflow::store::{InMemoryLineageStore, LineageStore};
use lineageflow::testing::{chain_records, wide_tree_records};

fn assemble_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble");
    for (fanout, depth) in [(4, 4), (8, 3), (16, 2)] {
        let records = wide_tree_records("R", fanout, depth);
        group.bench_with_input(
            BenchmarkId::new("wide", format!("{fanout}x{depth}")),
            &records,
            |b, records| b.iter(|| LineageTree::assemble("R", black_box(records))),
        );
    }

    let names: Vec<String> = (0..2_000).map(|i| format!("n{i:05}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let chain = chain_records("R", &refs);
    group.bench_function("chain/2000", |b| {
        b.iter(|| LineageTree::assemble("R", black_box(&chain)));
    });
    group.finish();
}

fn reconstruct_benchmark(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        return;
    };
    let store = Arc::new(InMemoryLineageStore::new());
    runtime.block_on(async {
        for record in wide_tree_records("R", 8, 3) {
            let _ = store.put(record).await;
        }
    });
    let reconstructor = TraceReconstructor::new(
        Arc::new(DurableChannel::new(ChannelConfig::retrace_defaults())),
        store,
        Arc::new(InMemoryArchive::new()),
        &RetraceConfig::default(),
    );

    c.bench_function("reconstruct/8x3", |b| {
        b.iter(|| runtime.block_on(reconstructor.reconstruct(black_box("R"), None)));
    });
}

criterion_group!(benches, assemble_benchmark, reconstruct_benchmark);
criterion_main!(benches);
