//! Benchmarks for the ingestion path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mqttdeck::parser::{parse_expression, Parser, ParserRegistry};
use mqttdeck::series::{Sample, SeriesStore};
use mqttdeck::{extract, FieldPath, MessageCache};

fn create_payloads(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            format!(
                r#"{{"sensor":{{"id":"t{}","value":{}}},"unit":"C"}}"#,
                i % 16,
                20.0 + (i % 50) as f64 / 10.0
            )
            .into_bytes()
        })
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let payloads = create_payloads(1000);
    group.throughput(Throughput::Elements(payloads.len() as u64));

    let default = ParserRegistry::new();
    group.bench_function("json_default", |b| {
        b.iter(|| {
            for payload in &payloads {
                let _ = default.decode(black_box("sensors/t1"), black_box(payload));
            }
        })
    });

    let mut expression = ParserRegistry::new();
    expression.set_parser(
        "sensors/t1",
        Parser::expression("(sensor.value * 9 / 5) + 32").unwrap(),
    );
    group.bench_function("expression", |b| {
        b.iter(|| {
            for payload in &payloads {
                let _ = expression.decode(black_box("sensors/t1"), black_box(payload));
            }
        })
    });

    group.bench_function("compile_expression", |b| {
        b.iter(|| parse_expression(black_box("{ value: round(sensor.value * 10) / 10, unit: \"C\" }")).unwrap())
    });

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    let payloads = create_payloads(1000);
    let parsers = ParserRegistry::new();
    let path = FieldPath::parse("sensor.value");
    group.throughput(Throughput::Elements(payloads.len() as u64));

    group.bench_function("on_message_and_extract", |b| {
        let mut cache = MessageCache::new(16);
        b.iter(|| {
            for (i, payload) in payloads.iter().enumerate() {
                let message = cache.on_message("sensors/t1", payload.clone(), i as i64, &parsers);
                black_box(extract(Some(&message), path.as_ref()));
            }
        })
    });

    group.finish();
}

fn bench_series(c: &mut Criterion) {
    let mut group = c.benchmark_group("series");

    for capacity in [20, 100, 1000] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_function(format!("push_10k_capacity_{}", capacity), |b| {
            b.iter(|| {
                let mut store = SeriesStore::new(capacity);
                for i in 0..10_000i64 {
                    store.push("chart-1", Sample::new(i, i as f64));
                }
                black_box(store.read("chart-1"))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_cache, bench_series);
criterion_main!(benches);
