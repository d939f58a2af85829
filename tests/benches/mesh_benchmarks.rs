//! # Nano-Mesh Benchmarks
//!
//! Hot paths on every call:
//!
//! | Area | Operation | Target |
//! |------|-----------|--------|
//! | Routing | Pattern match per route | < 1µs |
//! | Routing | Full dispatch, in process | < 50µs |
//! | RPC | Register + fulfill a pending call | < 5µs |
//! | RPC | Call over the in-memory broker | < 200µs |

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mesh_module::{handler, HandlerResult, Module, Request, Response, RoutePattern, Router, Verb};
use mesh_rpc::{CorrelationId, Payload, PendingCallRegistry, RpcConfig};
use shared_bus::InMemoryBroker;
use shared_types::{Envelope, CONTENT_TYPE_JSON};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Routing
// ============================================================================

fn bench_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing-pattern");

    let cases = [
        ("literal", "/accounts/list", "/accounts/list"),
        ("one_param", "/accounts/:id", "/accounts/4f1c9a"),
        (
            "three_params",
            "/orgs/:org/teams/:team/members/:user",
            "/orgs/acme/teams/core/members/ada",
        ),
        ("mismatch", "/orgs/:org/teams/:team", "/orgs/acme/projects/core"),
    ];

    for (name, pattern, path) in cases {
        let pattern = RoutePattern::parse(pattern).unwrap();
        group.bench_with_input(BenchmarkId::new("matches", name), &path, |b, path| {
            b.iter(|| black_box(pattern.matches(black_box(path))))
        });
    }

    group.finish();
}

fn bench_router_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("routing-dispatch");

    for routes in [1usize, 16, 128] {
        let router = Router::new("bench");
        for i in 0..routes {
            router
                .add_handler(
                    Verb::Get,
                    &format!("/bench/r{i}/:id"),
                    [handler(|req: Request| async move {
                        let id = req.param("id").unwrap_or_default().to_string();
                        HandlerResult::Ok(Some(Response::text(200, id)))
                    })],
                )
                .unwrap();
        }
        // Worst case: the matching route was registered last.
        let target = format!("/bench/r{}/42", routes - 1);
        let body = Envelope::new(Verb::Get, target, CONTENT_TYPE_JSON, Vec::new(), None)
            .encode()
            .unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("last_route", routes), &body, |b, body| {
            b.to_async(&rt)
                .iter(|| async { black_box(router.dispatch(CONTENT_TYPE_JSON, body).await) })
        });
    }

    group.finish();
}

// ============================================================================
// RPC
// ============================================================================

fn bench_pending_registry(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("rpc-pending");

    let registry = Arc::new(PendingCallRegistry::new());
    let mut next = 0u64;
    group.bench_function("register_fulfill_wait", |b| {
        b.to_async(&rt).iter(|| {
            next += 1;
            let id = CorrelationId::new(next);
            let registry = registry.clone();
            async move {
                let slot = registry.register(id, "bench").unwrap();
                registry.fulfill(id, Payload::new(CONTENT_TYPE_JSON, Bytes::from_static(b"{}")));
                black_box(slot.wait().await.unwrap())
            }
        })
    });

    for in_flight in [100u64, 1_000] {
        group.throughput(Throughput::Elements(in_flight));
        group.bench_with_input(
            BenchmarkId::new("register_cancel_batch", in_flight),
            &in_flight,
            |b, &n| {
                b.iter(|| {
                    let registry = Arc::new(PendingCallRegistry::new());
                    let slots: Vec<_> = (0..n)
                        .map(|i| registry.register(CorrelationId::new(i), "bench").unwrap())
                        .collect();
                    drop(slots);
                    black_box(registry.pending_count())
                })
            },
        );
    }

    group.finish();
}

fn bench_call_over_broker(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("rpc-call");
    group.measurement_time(Duration::from_secs(10));

    let caller = rt.block_on(async {
        let broker = InMemoryBroker::new();
        let connector = Arc::new(broker.clone());

        let echo = Arc::new(
            Module::register("echo", RpcConfig::default(), connector.clone())
                .await
                .unwrap(),
        );
        echo.post(
            "/echo",
            [handler(|req: Request| async move {
                HandlerResult::Ok(Some(Response::new(200, req.content_type.clone(), req.body)))
            })],
        )
        .unwrap();
        let listening = echo.clone();
        tokio::spawn(async move { listening.listen().await });
        while broker.consumer_count("echo") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        Module::register("caller", RpcConfig::default(), connector)
            .await
            .unwrap()
    });

    let body = Bytes::from(vec![b'x'; 256]);
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("echo_256b", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                caller
                    .call(Verb::Post, "/echo", "application/octet-stream", body.clone(), None)
                    .await
                    .unwrap(),
            )
        })
    });

    group.finish();
}

criterion_group!(routing, bench_pattern_matching, bench_router_dispatch);
criterion_group!(rpc, bench_pending_registry, bench_call_over_broker);
criterion_main!(routing, rpc);
