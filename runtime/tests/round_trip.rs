//! End-to-end request/reply over the in-memory transport.
//!
//! Both ends share one `InMemoryTransport`; the handling side subscribes under
//! its own consumer group, as a separate service would.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use reply_bridge_core::{
    BridgeError, CancellationToken, CorrelationKey, Envelope, HandlerError, Reply, ReplyFormat,
    Transport,
};
use reply_bridge_runtime::{BridgeClient, Correlator, DispatchLoop, DispatchReport, Handler};
use reply_bridge_testing::{InMemoryTransport, init_tracing};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const REQUESTS: &str = "payments.requests";
const REPLIES: &str = "payments.replies";

struct Responder {
    cancel: CancellationToken,
    task: JoinHandle<DispatchReport>,
}

impl Responder {
    async fn start(transport: &InMemoryTransport, handler: Arc<dyn Handler>, format: ReplyFormat) -> Self {
        let service = transport.with_consumer_group("payments");
        let requests = service.subscribe(REQUESTS).await.unwrap();
        let dispatch = DispatchLoop::new(Arc::new(service), REPLIES, handler).with_reply_format(format);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { dispatch.run(requests, token).await });
        Self { cancel, task }
    }

    async fn stop(self) -> DispatchReport {
        self.cancel.cancel();
        self.task.await.unwrap()
    }
}

async fn connect(transport: &InMemoryTransport, format: ReplyFormat) -> BridgeClient {
    let transport = Arc::new(transport.clone());
    let correlator = Correlator::new(transport.clone(), REQUESTS).with_reply_format(format);
    BridgeClient::connect(transport, REPLIES, correlator).await.unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn accept_all() -> Arc<dyn Handler> {
    Arc::new(|_envelope: Envelope| async move { Ok::<_, HandlerError>(b"OK".to_vec()) })
}

#[tokio::test]
async fn legacy_round_trip_returns_ok_marker() {
    init_tracing();
    let transport = InMemoryTransport::new();
    let responder = Responder::start(&transport, accept_all(), ReplyFormat::Legacy).await;
    let client = connect(&transport, ReplyFormat::Legacy).await;

    let payload = br#"{"id":7,"user_id":1,"is_deposit":true,"amount":10.0,"date":"2025-01-01T00:00:00Z"}"#;
    let bytes = client
        .send_and_await(&CancellationToken::new(), CorrelationKey::from("req-7"), payload, None)
        .await
        .unwrap();

    assert_eq!(bytes, b"OK");
    assert!(!client.correlator().is_pending(&CorrelationKey::from("req-7")));

    let requests = transport.published(REQUESTS);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].key, CorrelationKey::from("req-7"));
    assert_eq!(requests[0].payload, payload);

    let replies = transport.published(REPLIES);
    assert_eq!(replies[0].key, CorrelationKey::from("req-7"));

    client.shutdown().await;
    let report = responder.stop().await;
    assert_eq!(report.received, 1);
    assert_eq!(report.replied, 1);
}

#[tokio::test]
async fn tagged_failure_reaches_caller_verbatim() {
    let transport = InMemoryTransport::new();
    let handler: Arc<dyn Handler> = Arc::new(|_envelope: Envelope| async move {
        Err::<Vec<u8>, _>(HandlerError::insufficient_funds("insufficient funds"))
    });
    let responder = Responder::start(&transport, handler, ReplyFormat::Tagged).await;
    let client = connect(&transport, ReplyFormat::Tagged).await;

    let reply = client
        .call(&CancellationToken::new(), CorrelationKey::from("req-8"), b"{}", None)
        .await
        .unwrap();

    assert_eq!(reply, Reply::Failure("insufficient funds".to_string()));

    client.shutdown().await;
    let report = responder.stop().await;
    assert_eq!(report.handler_failures, 1);
    assert_eq!(report.replied, 1);
}

#[tokio::test]
async fn tagged_success_carries_handler_payload() {
    let transport = InMemoryTransport::new();
    let echo: Arc<dyn Handler> =
        Arc::new(|envelope: Envelope| async move { Ok::<_, HandlerError>(envelope.payload) });
    let responder = Responder::start(&transport, echo, ReplyFormat::Tagged).await;
    let client = connect(&transport, ReplyFormat::Tagged).await;

    let reply = client
        .call(&CancellationToken::new(), CorrelationKey::generate(), b"ping", None)
        .await
        .unwrap();
    assert_eq!(reply, Reply::Success(b"ping".to_vec()));

    client.shutdown().await;
    responder.stop().await;
}

#[tokio::test]
async fn concurrent_calls_get_their_own_replies() {
    let transport = InMemoryTransport::new();
    let echo: Arc<dyn Handler> = Arc::new(|envelope: Envelope| async move {
        // Finish in reverse order of arrival.
        let delay = 50 - u64::from(envelope.payload[0]);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, HandlerError>(envelope.payload)
    });
    let responder = Responder::start(&transport, echo, ReplyFormat::Tagged).await;
    let client = connect(&transport, ReplyFormat::Tagged).await;

    let calls = (0..20u8).map(|i| {
        let client = &client;
        async move {
            let reply = client
                .call(&CancellationToken::new(), CorrelationKey::generate(), &[i], None)
                .await
                .unwrap();
            (i, reply)
        }
    });

    for (i, reply) in futures::future::join_all(calls).await {
        assert_eq!(reply, Reply::Success(vec![i]));
    }
    assert_eq!(client.correlator().pending_count(), 0);

    client.shutdown().await;
    responder.stop().await;
}

#[tokio::test]
async fn redelivered_request_is_applied_once() {
    let transport = InMemoryTransport::new();
    let applied = Arc::new(Mutex::new(HashSet::new()));
    let invocations = Arc::new(AtomicUsize::new(0));

    let handler: Arc<dyn Handler> = {
        let applied = Arc::clone(&applied);
        let invocations = Arc::clone(&invocations);
        Arc::new(move |envelope: Envelope| {
            let applied = Arc::clone(&applied);
            let invocations = Arc::clone(&invocations);
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                applied.lock().unwrap().insert(envelope.payload);
                Ok::<_, HandlerError>(b"OK".to_vec())
            }
        })
    };
    let responder = Responder::start(&transport, handler, ReplyFormat::Legacy).await;
    let client = connect(&transport, ReplyFormat::Legacy).await;
    let cancel = CancellationToken::new();

    let first = client
        .send_and_await(&cancel, CorrelationKey::from("tx-7"), b"tx-7", None)
        .await
        .unwrap();
    // The key is free again once the first call completed.
    let second = client
        .send_and_await(&cancel, CorrelationKey::from("tx-7"), b"tx-7", None)
        .await
        .unwrap();

    assert_eq!(first, b"OK");
    assert_eq!(second, b"OK");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert_eq!(applied.lock().unwrap().len(), 1);

    client.shutdown().await;
    responder.stop().await;
}

#[tokio::test(start_paused = true)]
async fn late_reply_after_timeout_is_discarded() {
    let transport = InMemoryTransport::new();
    let client = connect(&transport, ReplyFormat::Legacy).await;

    let err = client
        .send_and_await(
            &CancellationToken::new(),
            CorrelationKey::from("req-9"),
            b"{}",
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { after, .. } if after == Duration::from_secs(5)));
    assert_eq!(client.correlator().pending_count(), 0);

    // A responder answering long after the caller gave up.
    transport
        .publish(REPLIES, &CorrelationKey::from("req-9"), b"OK")
        .await
        .unwrap();
    wait_until(|| transport.committed_offset(REPLIES) == Some(1)).await;

    let report = client.shutdown().await;
    assert_eq!(report.received, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.discarded, 1);
}

#[tokio::test]
async fn publish_failure_returns_immediately() {
    let transport = InMemoryTransport::new();
    transport.fail_publishes(REQUESTS, "broker unavailable");
    let client = connect(&transport, ReplyFormat::Tagged).await;

    let err = client
        .call(&CancellationToken::new(), CorrelationKey::from("req-1"), b"{}", None)
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Publish { .. }));
    assert!(err.to_string().contains("broker unavailable"));
    assert_eq!(client.correlator().pending_count(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn waiting_caller_sees_closed_on_shutdown() {
    let transport = InMemoryTransport::new();
    let client = Arc::new(connect(&transport, ReplyFormat::Tagged).await);

    let mut call = tokio_test::task::spawn({
        let client = Arc::clone(&client);
        async move {
            client
                .send_and_await(&CancellationToken::new(), CorrelationKey::from("req-2"), b"{}", None)
                .await
        }
    });
    tokio_test::assert_pending!(call.poll());
    assert!(client.correlator().is_pending(&CorrelationKey::from("req-2")));

    client.correlator().close();
    assert!(call.is_woken());
    let result = tokio_test::assert_ready!(call.poll());
    assert_eq!(result, Err(BridgeError::Closed));
    drop(call);

    Arc::into_inner(client).unwrap().shutdown().await;
}
