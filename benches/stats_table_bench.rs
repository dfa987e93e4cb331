use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tiermgr::stats::table::PageStatsTable;

fn bench_lookup_or_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_stats_table");
    for page_count in [64usize, 1024, 16384] {
        group.bench_with_input(
            BenchmarkId::new("lookup_or_create_existing", page_count),
            &page_count,
            |b, &page_count| {
                let table = PageStatsTable::new(1_048_583);
                for i in 0..page_count {
                    table.lookup_or_create((i as u64) * 4096);
                }
                b.iter(|| {
                    for i in 0..page_count {
                        black_box(table.lookup_or_create((i as u64) * 4096));
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_update_all_features(c: &mut Criterion) {
    let table = PageStatsTable::new(1_048_583);
    for i in 0..4096u64 {
        let rec = table.lookup_or_create(i * 4096);
        rec.record_access(false);
    }
    c.bench_function("update_all_features_4096_pages", |b| {
        b.iter(|| table.update_all_features());
    });
}

criterion_group!(benches, bench_lookup_or_create, bench_update_all_features);
criterion_main!(benches);
