use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use probe_maps::map::{Direction, KeyKind, KeyPart, KeySchema, Map, MapOptions, SortBy};
use probe_maps::percpu::FixedCpuIndex;
use probe_maps::pmap::PMap;
use probe_maps::stat::{render_histogram, HistogramSpec, StatData, StatField};

const NAMES: [&str; 8] = [
    "read", "write", "openat", "close", "futex", "mmap", "epoll_wait", "sendto",
];

fn syscall_schema() -> KeySchema {
    KeySchema::new(vec![KeyKind::Str { max_len: 32 }, KeyKind::Int64]).expect("schema")
}

fn build_stat_map(entries: i64) -> Map<StatData> {
    let mut map = Map::new(
        MapOptions::with_capacity(entries as usize),
        syscall_schema(),
        HistogramSpec::log(),
    )
    .expect("map");
    for i in 0..entries {
        let key = [KeyPart::Str(NAMES[(i % 8) as usize]), KeyPart::Int(i)];
        map.add(&key, (i * 7919) % 100_000).expect("add");
    }
    map
}

fn bench_upsert(c: &mut Criterion) {
    let mut ints = Map::<i64>::new(MapOptions::with_capacity(4096), KeySchema::int(), ())
        .expect("map");
    let mut i = 0i64;
    c.bench_function("map/upsert_int", |b| {
        b.iter(|| {
            i = (i + 1) & 4095;
            ints.add(black_box(&[KeyPart::Int(i)]), 1).expect("add");
        })
    });

    let mut stats = build_stat_map(1024);
    let mut n = 0usize;
    c.bench_function("map/upsert_string_stat", |b| {
        b.iter(|| {
            n = n.wrapping_add(1);
            let key = [KeyPart::Str(NAMES[n % 8]), KeyPart::Int((n % 1024) as i64)];
            stats.add(black_box(&key), black_box(n as i64)).expect("add");
        })
    });

    let mut ring = Map::<i64>::new(
        MapOptions::with_capacity(256).wrap(true),
        KeySchema::int(),
        (),
    )
    .expect("map");
    let mut k = 0i64;
    c.bench_function("map/upsert_wrapping", |b| {
        b.iter(|| {
            k += 1;
            ring.set(black_box(&[KeyPart::Int(k)]), k).expect("set");
        })
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let mut pmap = PMap::<StatData>::new(
        8,
        MapOptions::with_capacity(1024),
        syscall_schema(),
        HistogramSpec::log(),
    )
    .expect("pmap")
    .with_cpu_index(FixedCpuIndex(0));
    for cpu in 0..8 {
        for i in 0..1024i64 {
            let key = [KeyPart::Str(NAMES[(i % 8) as usize]), KeyPart::Int(i % 256)];
            pmap.upsert_on(cpu, &key, i, true).expect("upsert");
        }
    }

    c.bench_function("pmap/aggregate_8x256", |b| {
        b.iter(|| black_box(pmap.aggregate(false).len()))
    });
}

fn bench_sort(c: &mut Criterion) {
    let mut map = build_stat_map(2048);

    c.bench_function("map/sort_full", |b| {
        b.iter(|| {
            map.sort(SortBy::Stat(StatField::Sum), Direction::Descending)
                .expect("sort")
        })
    });

    c.bench_function("map/sort_top_10", |b| {
        b.iter(|| {
            map.sort_top_n(10, SortBy::Stat(StatField::Max), Direction::Descending)
                .expect("top n")
        })
    });
}

fn bench_stat(c: &mut Criterion) {
    let log = HistogramSpec::log();
    let linear = HistogramSpec::linear(0, 10_000, 100).expect("spec");
    let mut log_stat = StatData::new(&log);
    let mut linear_stat = StatData::new(&linear);
    let mut v = 0i64;

    c.bench_function("stat/add_sample_log", |b| {
        b.iter(|| {
            v = (v + 7919) % 1_000_000;
            log_stat.add_sample(&log, black_box(v));
        })
    });

    c.bench_function("stat/add_sample_linear", |b| {
        b.iter(|| {
            v = (v + 7919) % 12_000;
            linear_stat.add_sample(&linear, black_box(v));
        })
    });

    c.bench_function("stat/render_log", |b| {
        b.iter(|| black_box(render_histogram(&log_stat, &log)))
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_upsert(c);
    bench_aggregate(c);
    bench_sort(c);
    bench_stat(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
