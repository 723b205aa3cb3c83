use courier_event_bus::{EventBus, Filter, Handler, Middleware, MiddlewareOutcome, SubscribeOptions, matches};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;

// ============================================================================
// Benchmark: Pattern Matching
// ============================================================================

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("matching");

    let cases = [
        ("exact", "user.profile.updated", "user.profile.updated"),
        ("wildcard_segment", "user.*.updated", "user.profile.updated"),
        ("global", "*", "user.profile.updated"),
        ("depth_mismatch", "user.*", "user.profile.updated"),
    ];

    for (name, pattern, event) in cases {
        group.bench_function(name, |b| {
            b.iter(|| black_box(matches(black_box(pattern), black_box(event))));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Publish Fan-out
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for subscribers in [1_u64, 10, 100] {
        let bus = EventBus::new();
        rt.block_on(async {
            for i in 0..subscribers {
                let pattern = if i % 2 == 0 { "order.*" } else { "order.created" };
                let priority = i32::try_from(i % 3).unwrap_or_default();
                bus.subscribe(pattern, Handler::sync(|_| Ok(())), SubscribeOptions::new().priority(priority))
                    .await
                    .unwrap();
            }
        });

        group.throughput(Throughput::Elements(subscribers));
        group.bench_with_input(BenchmarkId::new("publish", subscribers), &bus, |b, bus| {
            b.to_async(&rt).iter(|| async {
                black_box(bus.publish("order.created", json!({"id": 1}), ()).await.unwrap());
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Middleware and Modifiers
// ============================================================================

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let bus = EventBus::new();
    bus.use_middleware(Middleware::sync(|_, mut data| {
        data["seen"] = json!(true);
        Ok(MiddlewareOutcome::Continue(data))
    }));
    rt.block_on(async {
        let options = SubscribeOptions::new().filter(Filter::sync(|data| data["seen"] == true));
        bus.subscribe("user.*", Handler::sync(|_| Ok(())), options).await.unwrap();
    });

    group.bench_function("middleware_filter_handler", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(bus.publish("user.created", json!({"id": 1}), ()).await.unwrap());
        });
    });

    let history = EventBus::builder().history(1_000).build().unwrap();
    group.bench_function("history_record", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(history.publish("metric.cpu", json!(0.5), ()).await.unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_matching, bench_fan_out, bench_pipeline);
criterion_main!(benches);
