//! Receive path of the correlator.
//!
//! The [`ReplyRouter`] is the single reader of the reply topic. For every reply
//! envelope it calls [`Correlator::deliver`], which wakes the matching caller or
//! drops the reply if nobody is waiting for it anymore.

use crate::correlator::{Correlator, DeliveryOutcome};
use crate::metrics::RouterMetrics;
use reply_bridge_core::{CancellationToken, Subscription};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Counters collected while a router runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterReport {
    /// Reply envelopes read from the topic
    pub received: u64,
    /// Replies handed to a waiting caller
    pub delivered: u64,
    /// Replies dropped (late, unknown key or duplicate)
    pub discarded: u64,
    /// Non-terminal read errors
    pub read_errors: u64,
}

/// Reads reply envelopes and routes them to waiting callers.
#[derive(Debug, Clone)]
pub struct ReplyRouter {
    correlator: Arc<Correlator>,
}

impl ReplyRouter {
    /// Create a router delivering into `correlator`.
    #[must_use]
    pub const fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }

    /// Read `subscription` until `cancel` fires or the stream closes.
    ///
    /// Per-record read errors are logged and skipped.
    pub async fn run(&self, mut subscription: Subscription, cancel: CancellationToken) -> RouterReport {
        let mut report = RouterReport::default();
        tracing::info!(topic = subscription.topic(), "Reply router started");

        loop {
            match subscription.read(&cancel).await {
                Ok(envelope) => {
                    report.received += 1;
                    RouterMetrics::record_received();
                    match self.correlator.deliver(&envelope.key, envelope.payload) {
                        DeliveryOutcome::Delivered => report.delivered += 1,
                        DeliveryOutcome::Unknown | DeliveryOutcome::Discarded => {
                            report.discarded += 1;
                        },
                    }
                },
                Err(e) if e.is_terminal() => {
                    tracing::debug!(topic = subscription.topic(), reason = %e, "Reply router stopping");
                    break;
                },
                Err(e) => {
                    report.read_errors += 1;
                    RouterMetrics::record_read_error();
                    tracing::warn!(topic = subscription.topic(), error = %e, "Failed to read reply");
                },
            }
        }

        tracing::info!(
            topic = subscription.topic(),
            received = report.received,
            delivered = report.delivered,
            discarded = report.discarded,
            "Reply router stopped"
        );
        report
    }

    /// Run the router on a background task.
    #[must_use]
    pub fn spawn(self, subscription: Subscription, cancel: CancellationToken) -> JoinHandle<RouterReport> {
        tokio::spawn(async move { self.run(subscription, cancel).await })
    }
}
