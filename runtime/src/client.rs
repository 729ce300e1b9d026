//! Sender-side facade: a [`Correlator`] with its [`ReplyRouter`] attached.

use crate::correlator::Correlator;
use crate::router::{ReplyRouter, RouterReport};
use reply_bridge_core::{
    BridgeError, CancellationToken, CorrelationKey, Reply, Transport, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Issues request/reply calls over a transport.
///
/// Connecting subscribes to the reply topic *before* any request can be
/// published, so a fast reply is never missed, and runs the reply router
/// in the background until [`shutdown`](Self::shutdown).
///
/// # Example
///
/// ```rust,ignore
/// let correlator = Correlator::new(transport.clone(), "payments.requests");
/// let client = BridgeClient::connect(transport, "payments.replies", correlator).await?;
///
/// let reply = client
///     .call(&cancel, CorrelationKey::generate(), &payload, None)
///     .await?;
///
/// client.shutdown().await;
/// ```
pub struct BridgeClient {
    correlator: Arc<Correlator>,
    router_cancel: CancellationToken,
    router: JoinHandle<RouterReport>,
}

impl BridgeClient {
    /// Subscribe to `reply_topic` and start routing replies into `correlator`.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the reply topic cannot be subscribed.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        reply_topic: &str,
        correlator: Correlator,
    ) -> Result<Self, TransportError> {
        let subscription = transport.subscribe(reply_topic).await?;
        let correlator = Arc::new(correlator);
        let router_cancel = CancellationToken::new();
        let router = ReplyRouter::new(Arc::clone(&correlator)).spawn(subscription, router_cancel.clone());

        tracing::info!(
            request_topic = correlator.request_topic(),
            reply_topic,
            "Bridge client connected"
        );

        Ok(Self {
            correlator,
            router_cancel,
            router,
        })
    }

    /// The underlying correlator.
    #[must_use]
    pub const fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Publish `payload` under `key` and wait for the raw reply payload.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send_and_await`].
    pub async fn send_and_await(
        &self,
        cancel: &CancellationToken,
        key: CorrelationKey,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, BridgeError> {
        self.correlator.send_and_await(cancel, key, payload, timeout).await
    }

    /// Publish `payload` under `key` and wait for the decoded [`Reply`].
    ///
    /// # Errors
    ///
    /// See [`Correlator::call`].
    pub async fn call(
        &self,
        cancel: &CancellationToken,
        key: CorrelationKey,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Reply, BridgeError> {
        self.correlator.call(cancel, key, payload, timeout).await
    }

    /// Stop the reply router and close the correlator.
    ///
    /// Callers still waiting return [`BridgeError::Closed`].
    pub async fn shutdown(self) -> RouterReport {
        self.router_cancel.cancel();
        self.correlator.close();

        match self.router.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Reply router task failed");
                RouterReport::default()
            },
        }
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("correlator", &self.correlator)
            .field("router_running", &!self.router.is_finished())
            .finish()
    }
}
