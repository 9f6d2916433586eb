use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use linkd::modes::{ConflictPolicy, merge_lists, resolve};
use linkd::state::ListEntry;

// Merge cost for ban lists of the size a busy channel carries, with half
// the masks shared between the two sides.

fn bans(prefix: &str, count: usize, offset: i64) -> Vec<ListEntry> {
    (0..count)
        .map(|i| ListEntry {
            mask: format!("*!*@{}{}.example.net", prefix, i),
            set_by: "op".to_string(),
            set_at: offset + i as i64,
        })
        .collect()
}

fn list_merge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_lists");
    for size in [16usize, 64, 256] {
        let mut ours = bans("shared", size / 2, 0);
        ours.extend(bans("ours", size / 2, 1_000));
        let mut theirs = bans("SHARED", size / 2, 10);
        theirs.extend(bans("theirs", size / 2, 2_000));
        group.throughput(Throughput::Elements((ours.len() + theirs.len()) as u64));

        group.bench_function(format!("union_{}", size), |b| {
            b.iter(|| merge_lists(black_box(&ours), black_box(&theirs), size))
        });
    }
    group.finish();
}

fn resolve_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    group.bench_function("minimum", |b| {
        b.iter(|| resolve(ConflictPolicy::Minimum, black_box("10"), 1, black_box("5"), 2))
    });
    group.bench_function("lexical", |b| {
        b.iter(|| resolve(ConflictPolicy::Lexical, black_box("zebra"), 1, black_box("apple"), 2))
    });
    group.finish();
}

criterion_group!(benches, list_merge_benchmark, resolve_benchmark);
criterion_main!(benches);
