//! Payment requests served end to end over the in-memory transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use reply_bridge_core::{CancellationToken, CorrelationKey, Reply, ReplyFormat, Transport};
use reply_bridge_ledger::{InMemoryLedger, PaymentHandler, Transaction};
use reply_bridge_runtime::{BridgeClient, Correlator, DispatchLoop, DispatchReport};
use reply_bridge_testing::{InMemoryTransport, test_timestamp};
use std::sync::Arc;
use tokio::task::JoinHandle;

const REQUESTS: &str = "payments.requests";
const REPLIES: &str = "payments.replies";

struct Harness {
    transport: InMemoryTransport,
    ledger: Arc<InMemoryLedger>,
    client: BridgeClient,
    shutdown: CancellationToken,
    service: JoinHandle<DispatchReport>,
}

impl Harness {
    async fn start(format: ReplyFormat) -> Self {
        let transport = InMemoryTransport::new();
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.open_account(1).unwrap();

        let service_transport = transport.with_consumer_group("payment-service");
        let requests = service_transport.subscribe(REQUESTS).await.unwrap();
        let dispatch = DispatchLoop::new(
            Arc::new(service_transport),
            REPLIES,
            Arc::new(PaymentHandler::new(Arc::clone(&ledger))),
        )
        .with_reply_format(format);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let service = tokio::spawn(async move { dispatch.run(requests, token).await });

        let caller = Arc::new(transport.with_consumer_group("api-gateway"));
        let correlator = Correlator::new(caller.clone(), REQUESTS).with_reply_format(format);
        let client = BridgeClient::connect(caller, REPLIES, correlator).await.unwrap();

        Self {
            transport,
            ledger,
            client,
            shutdown,
            service,
        }
    }

    async fn send(&self, key: &str, transaction: &Transaction) -> Reply {
        let payload = serde_json::to_vec(transaction).unwrap();
        self.client
            .call(&CancellationToken::new(), CorrelationKey::from(key), &payload, None)
            .await
            .unwrap()
    }

    async fn stop(self) -> DispatchReport {
        self.client.shutdown().await;
        self.shutdown.cancel();
        self.service.await.unwrap()
    }
}

#[tokio::test]
async fn deposit_and_withdraw_over_the_bridge() {
    let harness = Harness::start(ReplyFormat::Tagged).await;

    let reply = harness
        .send("tx-1", &Transaction::deposit(1, 1, 100.0, test_timestamp()))
        .await;
    assert_eq!(reply, Reply::Success(b"OK".to_vec()));

    let reply = harness
        .send("tx-2", &Transaction::withdrawal(2, 1, 30.0, test_timestamp()))
        .await;
    assert_eq!(reply, Reply::Success(b"OK".to_vec()));
    assert!((harness.ledger.balance(1).unwrap() - 70.0).abs() < f64::EPSILON);

    let report = harness.stop().await;
    assert_eq!(report.replied, 2);
}

#[tokio::test]
async fn overdraft_comes_back_as_failure_reply() {
    let harness = Harness::start(ReplyFormat::Tagged).await;

    let reply = harness
        .send("tx-3", &Transaction::withdrawal(3, 1, 5.0, test_timestamp()))
        .await;
    assert_eq!(
        reply,
        Reply::Failure("Error processing transaction: not enough balance for withdraw".to_string())
    );

    let report = harness.stop().await;
    assert_eq!(report.handler_failures, 1);
}

#[tokio::test]
async fn legacy_peers_see_ok_or_error_text() {
    let harness = Harness::start(ReplyFormat::Legacy).await;

    let reply = harness
        .send("tx-4", &Transaction::deposit(4, 1, 1.0, test_timestamp()))
        .await;
    assert_eq!(reply, Reply::Success(b"OK".to_vec()));

    let raw = harness
        .client
        .send_and_await(&CancellationToken::new(), CorrelationKey::from("tx-5"), b"{oops", None)
        .await
        .unwrap();
    assert!(String::from_utf8(raw).unwrap().starts_with("invalid JSON: "));

    harness.stop().await;
}

#[tokio::test]
async fn redelivered_request_is_applied_once() {
    let harness = Harness::start(ReplyFormat::Tagged).await;
    let deposit = Transaction::deposit(6, 1, 25.0, test_timestamp());

    assert_eq!(harness.send("tx-6", &deposit).await, Reply::Success(b"OK".to_vec()));

    // The broker redelivers the same request record.
    let payload = serde_json::to_vec(&deposit).unwrap();
    harness
        .transport
        .publish(REQUESTS, &CorrelationKey::from("tx-6"), &payload)
        .await
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while harness.transport.len(REPLIES) < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second reply was not published");

    assert!((harness.ledger.balance(1).unwrap() - 25.0).abs() < f64::EPSILON);
    let report = harness.stop().await;
    assert_eq!(report.received, 2);
    assert_eq!(report.replied, 2);
}
