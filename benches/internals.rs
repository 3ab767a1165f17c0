use std::path::PathBuf;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use cmdprobe::accounting::{AccountingReport, parse_duration};
use cmdprobe::aggregate::BenchmarkResultSet;
use cmdprobe::display;
use cmdprobe::launch::split_command;
use cmdprobe::series::average_time_series;
use cmdprobe::types::{
    CanonicalResult, CpuResult, DiskResult, MemoryResult, ProcessResult, Sample, TimeSeries,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(path).unwrap()
}

/// A series of `count` samples roughly `step` ms apart, offset by `seed`.
fn make_series(count: u64, step: u64, seed: u64) -> TimeSeries {
    TimeSeries::from_samples((0..count).map(|i| Sample {
        elapsed_ms: seed + i * step + (i * seed) % 3,
        cpu_percent: ((i * 7 + seed) % 100) as f64,
        memory_bytes: 1_000_000 + i * 4096,
    }))
}

fn make_result(seed: u64, samples: u64) -> CanonicalResult {
    CanonicalResult {
        process: ProcessResult {
            stdout: "done\n".into(),
            stderr: String::new(),
            execution_time: 1.0 + seed as f64 / 100.0,
            exit_code: 0,
            skip_benchmarking: false,
        },
        cpu: CpuResult {
            user_time: 0.8,
            system_time: 0.1,
            total_time: 0.9,
        },
        memory: MemoryResult {
            max: 2_000_000 + seed,
            max_perprocess: 1_500_000,
        },
        disk: DiskResult {
            read_bytes: 4096,
            write_bytes: 8192,
            total_bytes: 12288,
            read_count: Some(3),
            write_count: Some(5),
            total_count: Some(8),
            ..DiskResult::default()
        },
        time_series: make_series(samples, 2, seed),
    }
}

// ---------------------------------------------------------------------------
// Benchmarks: accounting report
// ---------------------------------------------------------------------------

fn bench_report(c: &mut Criterion) {
    let text = fixture("gnu_time_node.txt");
    c.bench_function("parse_report", |b| {
        b.iter(|| AccountingReport::parse(&text).unwrap());
    });

    let mut group = c.benchmark_group("parse_duration");
    for input in ["02.50", "1:02.50", "1:01:02.50"] {
        group.bench_with_input(BenchmarkId::new("input", input), input, |b, s| {
            b.iter(|| parse_duration(s).unwrap());
        });
    }
    group.finish();
}

fn bench_split_command(c: &mut Criterion) {
    let command = r#"sh -c 'for i in 1 2 3; do echo "$i"; done' "quoted \"arg\"" plain\ word"#;
    c.bench_function("split_command", |b| {
        b.iter(|| split_command(command).unwrap());
    });
}

// ---------------------------------------------------------------------------
// Benchmarks: aggregate
// ---------------------------------------------------------------------------

fn bench_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("statistics");
    for &iterations in &[1u64, 10, 50] {
        let set: BenchmarkResultSet = (0..iterations).map(|i| make_result(i, 500)).collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(iterations),
            &set,
            |b, set| {
                b.iter(|| set.get_statistics());
            },
        );
    }
    group.finish();
}

fn bench_average_time_series(c: &mut Criterion) {
    let mut group = c.benchmark_group("average_time_series");
    for &samples in &[100u64, 1_000, 10_000] {
        let series: Vec<TimeSeries> = (0..5)
            .map(|seed| make_series(samples + seed * 10, 2, seed))
            .collect();
        let refs: Vec<&TimeSeries> = series.iter().collect();
        group.bench_with_input(BenchmarkId::from_parameter(samples), &refs, |b, refs| {
            b.iter(|| average_time_series(refs));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmarks: display
// ---------------------------------------------------------------------------

fn bench_display(c: &mut Criterion) {
    let set: BenchmarkResultSet = (0..10).map(|i| make_result(i, 500)).collect();
    let stats = set.get_statistics();

    let mut group = c.benchmark_group("display");
    group.bench_function("statistics", |b| {
        b.iter(|| display::format_statistics(&stats));
    });
    group.bench_function("json", |b| {
        b.iter(|| display::format_json(&set));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_report,
    bench_split_command,
    bench_statistics,
    bench_average_time_series,
    bench_display
);
criterion_main!(benches);
