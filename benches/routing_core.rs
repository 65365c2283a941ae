//! Benchmarks for the Message Routing Core's two hottest paths: steady-state
//! publish/fan-out, and the reconfiguration critical section that runs under
//! the single process-wide routing mutex.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fogline::broker_adapter::{BrokerAdapter, InMemoryBrokerAdapter};
use fogline::connector_pool::ConnectorClientPool;
use fogline::domain::{ContentType, Message, MessageTag, Receiver, Route, WorkloadId};
use fogline::routing_core::MessageRoutingCore;
use fogline::status_reporter::StatusReporter;
use fogline::workload_registry::WorkloadRegistry;
use std::sync::Arc;
use std::time::Duration;

fn local_receiver(uuid: WorkloadId) -> Receiver {
    Receiver {
        workload_uuid: uuid,
        local: true,
        connector_producer_config: None,
    }
}

async fn routing_core_with_fanout(receiver_count: usize) -> (MessageRoutingCore, WorkloadId) {
    let broker = Arc::new(InMemoryBrokerAdapter::new());
    broker.start_server().await.unwrap();
    let core = MessageRoutingCore::new(
        broker as Arc<dyn BrokerAdapter>,
        Arc::new(ConnectorClientPool::new(true, std::env::temp_dir())),
        Arc::new(WorkloadRegistry::new()),
        Arc::new(StatusReporter::new()),
    );
    let publisher = WorkloadId::generate();
    let mut route = Route::empty(publisher);
    for _ in 0..receiver_count {
        route.receivers.insert(local_receiver(WorkloadId::generate()));
    }
    core.initialize(vec![route]).await.unwrap();
    (core, publisher)
}

fn bench_publish_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("publish_fanout");
    group.measurement_time(Duration::from_secs(10));

    for receiver_count in [1usize, 8, 64, 256] {
        group.throughput(Throughput::Elements(receiver_count as u64));
        group.bench_with_input(
            BenchmarkId::new("receivers", receiver_count),
            &receiver_count,
            |b, &receiver_count| {
                let (core, publisher) =
                    rt.block_on(routing_core_with_fanout(receiver_count));
                b.to_async(&rt).iter(|| {
                    let core = &core;
                    async move {
                        let message = Message::new(
                            publisher,
                            MessageTag::default(),
                            ContentType::default(),
                            bytes::Bytes::from_static(b"benchmark payload"),
                        );
                        black_box(core.publish(message).await.unwrap());
                    }
                });
            },
        );
    }
    group.finish();
}

fn bench_reconfiguration(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("reconfiguration");
    group.measurement_time(Duration::from_secs(10));

    for route_count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(route_count as u64));
        group.bench_with_input(
            BenchmarkId::new("routes", route_count),
            &route_count,
            |b, &route_count| {
                b.to_async(&rt).iter_batched(
                    || {
                        let core = rt.block_on(async {
                            let broker = Arc::new(InMemoryBrokerAdapter::new());
                            broker.start_server().await.unwrap();
                            let core = MessageRoutingCore::new(
                                broker as Arc<dyn BrokerAdapter>,
                                Arc::new(ConnectorClientPool::new(true, std::env::temp_dir())),
                                Arc::new(WorkloadRegistry::new()),
                                Arc::new(StatusReporter::new()),
                            );
                            let routes: Vec<Route> = (0..route_count)
                                .map(|_| {
                                    let mut route = Route::empty(WorkloadId::generate());
                                    route.receivers.insert(local_receiver(WorkloadId::generate()));
                                    route
                                })
                                .collect();
                            core.initialize(routes.clone()).await.unwrap();
                            (core, routes)
                        });
                        core
                    },
                    |(core, mut routes)| async move {
                        // Shuffle by dropping and re-adding one receiver per
                        // route, forcing a full reconfiguration pass.
                        for route in &mut routes {
                            route.receivers.insert(local_receiver(WorkloadId::generate()));
                        }
                        black_box(core.update(routes).await.unwrap());
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_publish_fanout, bench_reconfiguration);
criterion_main!(benches);
