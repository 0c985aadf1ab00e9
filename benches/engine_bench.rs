use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use wxarchive::{daily, integrity, units, Manager};
use wxarchive_core::{models::summary::SECONDS_PER_DAY, ArchiveRecord, BackendDescriptor, Schema, UnitSystem};
use wxarchive_memory::MemoryDriver;

const RECORDS: i64 = 2_880;

fn record(ts: i64) -> ArchiveRecord {
    ArchiveRecord::new(ts)
        .with("usUnits", UnitSystem::Metric.code())
        .with("interval", 5)
        .with("outTemp", (ts % 40) as f64 - 10.0)
        .with("barometer", 1013.0)
        .with("windSpeed", (ts % 25) as f64)
        .with("rain", 0.2)
}

/// Ten days of five-minute records in a fresh in-memory archive.
fn setup() -> (MemoryDriver, Manager) {
    let driver = MemoryDriver::new();
    let descriptor = BackendDescriptor::new("Memory", "memory", "weewx");
    let manager = Manager::open_with_create(&driver, &descriptor, "archive", &Schema::wview_extended()).unwrap();
    let start = 10 * SECONDS_PER_DAY;
    manager
        .add_records((0..RECORDS).map(|i| Ok(record(start + i * 300))))
        .unwrap();
    (driver, manager)
}

fn bench_backfill(c: &mut Criterion) {
    c.bench_function("backfill_ten_days", |b| {
        b.iter_batched(
            setup,
            |(_driver, manager)| daily::backfill(black_box(&manager)).unwrap(),
            BatchSize::LargeInput,
        )
    });
}

fn bench_check_strings(c: &mut Criterion) {
    let (_driver, manager) = setup();
    c.bench_function("check_strings_clean_archive", |b| {
        b.iter(|| integrity::check(black_box(&manager), false).unwrap())
    });
}

fn bench_transfer(c: &mut Criterion) {
    let (_driver, source) = setup();
    c.bench_function("transfer_between_memory_archives", |b| {
        b.iter_batched(
            || {
                let driver = MemoryDriver::new();
                let descriptor = BackendDescriptor::new("Memory", "memory", "weewx_copy");
                let dest =
                    Manager::open_with_create(&driver, &descriptor, "archive", source.schema()).unwrap();
                (driver, dest)
            },
            |(_driver, dest)| dest.add_records(source.records()).unwrap(),
            BatchSize::LargeInput,
        )
    });
}

fn bench_convert(c: &mut Criterion) {
    let sample = record(1_700_000_000);
    c.bench_function("convert_record_metric_to_us", |b| {
        b.iter(|| units::convert_record(black_box(&sample), UnitSystem::Us).unwrap())
    });
}

criterion_group!(
    benches,
    bench_backfill,
    bench_check_strings,
    bench_transfer,
    bench_convert
);
criterion_main!(benches);
