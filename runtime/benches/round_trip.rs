//! Round-trip benchmarks over the in-memory transport.
//!
//! Measures the bridge overhead on top of a transport with no I/O:
//! - reply encoding and decoding for both wire formats
//! - a full call: register, publish, dispatch, reply, route, wake
//!
//! Run with: `cargo bench -p reply-bridge-runtime`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use reply_bridge_core::{
    CancellationToken, CorrelationKey, Envelope, HandlerError, Reply, ReplyFormat, Transport,
};
use reply_bridge_runtime::{BridgeClient, Correlator, DispatchLoop, Handler};
use reply_bridge_testing::InMemoryTransport;
use std::sync::Arc;

const FORMATS: [ReplyFormat; 2] = [ReplyFormat::Tagged, ReplyFormat::Legacy];

fn benchmark_reply_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_format");
    group.throughput(Throughput::Elements(1));

    let reply = Reply::Success(vec![0; 256]);
    for format in FORMATS {
        group.bench_with_input(BenchmarkId::new("encode", format), &format, |b, format| {
            b.iter(|| black_box(format.encode(black_box(&reply))));
        });

        let encoded = format.encode(&reply).expect("reply should encode");
        group.bench_with_input(BenchmarkId::new("decode", format), &format, |b, format| {
            b.iter(|| black_box(format.decode(black_box(&encoded))));
        });
    }

    group.finish();
}

fn benchmark_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    for format in FORMATS {
        let shutdown = CancellationToken::new();
        let client = runtime.block_on(async {
            let transport = InMemoryTransport::new();
            let service = transport.with_consumer_group("bench-service");
            let requests = service
                .subscribe("bench.requests")
                .await
                .expect("subscribe should succeed");

            let echo: Arc<dyn Handler> =
                Arc::new(|envelope: Envelope| async move { Ok::<_, HandlerError>(envelope.payload) });
            let dispatch = DispatchLoop::new(Arc::new(service), "bench.replies", echo)
                .with_reply_format(format);
            let token = shutdown.clone();
            tokio::spawn(async move { dispatch.run(requests, token).await });

            let transport = Arc::new(transport);
            let correlator = Correlator::new(transport.clone(), "bench.requests").with_reply_format(format);
            BridgeClient::connect(transport, "bench.replies", correlator)
                .await
                .expect("connect should succeed")
        });

        group.bench_with_input(BenchmarkId::new("call", format), &format, |b, _| {
            let cancel = CancellationToken::new();
            b.to_async(&runtime).iter(|| async {
                let reply = client
                    .call(&cancel, CorrelationKey::generate(), b"{\"id\":1}", None)
                    .await;
                black_box(reply)
            });
        });

        shutdown.cancel();
        runtime.block_on(client.shutdown());
    }

    group.finish();
}

criterion_group!(benches, benchmark_reply_format, benchmark_round_trip);
criterion_main!(benches);
