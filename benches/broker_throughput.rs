use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use goflow::core::broker::{Broker, ChannelBroker};
use goflow::core::Task;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ITEMS: usize = 1_000;

async fn pump(capacity: usize) {
    let ctx = CancellationToken::new();
    let broker = Arc::new(ChannelBroker::<Task>::new(capacity));
    let rx = broker.dequeue(&ctx).await.unwrap();

    let producer = {
        let broker = Arc::clone(&broker);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            for n in 0..ITEMS {
                broker
                    .submit(&ctx, Task::with_id(n.to_string(), "bench", json!(n)))
                    .await
                    .unwrap();
            }
        })
    };
    for _ in 0..ITEMS {
        rx.recv().await.unwrap();
    }
    producer.await.unwrap();
    ctx.cancel();
    broker.await_shutdown().await;
}

fn benchmark_channel_broker(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_broker");
    group.measurement_time(Duration::from_secs(10));

    for capacity in [0, 1, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &cap| {
            b.to_async(tokio::runtime::Runtime::new().unwrap())
                .iter(|| pump(cap))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_channel_broker);
criterion_main!(benches);
