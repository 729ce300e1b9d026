//! Sender-side request/reply correlation.
//!
//! The [`Correlator`] owns the table of outstanding requests. A caller registers
//! a pending entry, publishes the request and waits on a capacity-1 slot until
//! one of three things happens: the reply router delivers a reply for the key,
//! the caller's cancellation token fires, or the deadline elapses.
//!
//! # Request lifecycle
//!
//! ```text
//! CREATED ──publish──► SENT ──┬──► REPLIED
//!    │                        ├──► TIMED_OUT
//!    └──publish error         └──► CANCELLED
//! ```
//!
//! The entry is registered *before* the request is published, so a reply can
//! never arrive ahead of its registration. Whatever ends the wait, the entry is
//! removed exactly once, by the waiter itself (an RAII guard also covers the
//! case where the waiting future is dropped).
//!
//! # Concurrency
//!
//! The table is guarded by a mutex. Every critical section is a single
//! insert, lookup or remove; the lock is never held across an `.await`.

use crate::metrics::CorrelatorMetrics;
use reply_bridge_core::{
    BridgeError, CancellationToken, CorrelationKey, Reply, ReplyFormat, Transport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default time a caller waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of handing an inbound reply to the correlator.
///
/// Only [`DeliveryOutcome::Delivered`] reaches a caller. The other outcomes are
/// logged and counted, never surfaced as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The waiting caller received the payload
    Delivered,
    /// No request is pending for the key (late reply or unknown key)
    Unknown,
    /// A request is registered but its slot cannot accept the payload
    /// (a reply was already delivered, or the waiter is leaving)
    Discarded,
}

impl DeliveryOutcome {
    /// Label used for logging and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Unknown => "unknown_key",
            Self::Discarded => "discarded",
        }
    }
}

/// Table entry for one in-flight request.
struct PendingRequest {
    slot: mpsc::Sender<Vec<u8>>,
    created_at: Instant,
}

type PendingTable = HashMap<CorrelationKey, PendingRequest>;

/// Synchronous-style request/reply on top of a [`Transport`].
///
/// # Example
///
/// ```rust,ignore
/// use reply_bridge_runtime::Correlator;
/// use reply_bridge_core::{CancellationToken, CorrelationKey};
///
/// let correlator = Arc::new(
///     Correlator::new(transport, "payments.requests")
///         .with_default_timeout(Duration::from_secs(10)),
/// );
///
/// // Replies are fed in by a ReplyRouter reading "payments.replies"
/// let reply = correlator
///     .call(&CancellationToken::new(), CorrelationKey::generate(), &payload, None)
///     .await?;
/// ```
pub struct Correlator {
    transport: Arc<dyn Transport>,
    request_topic: String,
    default_timeout: Duration,
    max_pending: Option<usize>,
    reply_format: ReplyFormat,
    pending: Mutex<PendingTable>,
    closed: AtomicBool,
}

impl Correlator {
    /// Create a correlator publishing requests to `request_topic`.
    ///
    /// Defaults: 60 second timeout, no ceiling on pending requests,
    /// [`ReplyFormat::Tagged`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, request_topic: impl Into<String>) -> Self {
        Self {
            transport,
            request_topic: request_topic.into(),
            default_timeout: DEFAULT_REPLY_TIMEOUT,
            max_pending: None,
            reply_format: ReplyFormat::default(),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the wait used when a call passes no explicit timeout.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Refuse new requests once `limit` requests are outstanding.
    #[must_use]
    pub const fn with_max_pending(mut self, limit: usize) -> Self {
        self.max_pending = Some(limit);
        self
    }

    /// Set the format used by [`call`](Self::call) to decode replies.
    #[must_use]
    pub const fn with_reply_format(mut self, format: ReplyFormat) -> Self {
        self.reply_format = format;
        self
    }

    /// Topic requests are published to.
    #[must_use]
    pub fn request_topic(&self) -> &str {
        &self.request_topic
    }

    /// Wait used when a call passes no explicit timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Reply format used by [`call`](Self::call).
    #[must_use]
    pub const fn reply_format(&self) -> ReplyFormat {
        self.reply_format
    }

    /// Publish `payload` under `key` and wait for the matching reply payload.
    ///
    /// `timeout` overrides the correlator's default wait for this call. The
    /// deadline starts once the request has been published.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::EmptyKey`] if `key` has no bytes
    /// - [`BridgeError::DuplicateKey`] if a request with `key` is already pending
    /// - [`BridgeError::CapacityExceeded`] if the pending ceiling is reached
    /// - [`BridgeError::Closed`] if the correlator is (or gets) closed
    /// - [`BridgeError::Publish`] if the transport rejects the request (no wait)
    /// - [`BridgeError::Cancelled`] if `cancel` fires first
    /// - [`BridgeError::Timeout`] if no reply arrives before the deadline
    pub async fn send_and_await(
        &self,
        cancel: &CancellationToken,
        key: CorrelationKey,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, BridgeError> {
        let started = Instant::now();
        let result = self.exchange(cancel, key, payload, timeout).await;

        let outcome = match &result {
            Ok(_) => "replied",
            Err(err) => err.label(),
        };
        CorrelatorMetrics::record_request(outcome, started.elapsed());
        result
    }

    /// Like [`send_and_await`](Self::send_and_await), then decode the reply
    /// payload with the correlator's [`ReplyFormat`].
    ///
    /// A [`Reply::Failure`] is a successful call: the remote handler answered,
    /// and its failure message is data for the caller to interpret.
    ///
    /// # Errors
    ///
    /// Everything [`send_and_await`](Self::send_and_await) returns, plus
    /// [`BridgeError::Decode`] if the reply payload is malformed.
    pub async fn call(
        &self,
        cancel: &CancellationToken,
        key: CorrelationKey,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Reply, BridgeError> {
        let bytes = self
            .send_and_await(cancel, key.clone(), payload, timeout)
            .await?;
        self.reply_format
            .decode(&bytes)
            .map_err(|source| BridgeError::Decode { key, source })
    }

    /// Hand an inbound reply to the caller waiting on `key`.
    ///
    /// Never blocks and never fails: if nobody is waiting, or the waiter's slot
    /// is already filled, the payload is dropped.
    pub fn deliver(&self, key: &CorrelationKey, payload: Vec<u8>) -> DeliveryOutcome {
        let outcome = {
            let table = self.table();
            match table.get(key) {
                None => DeliveryOutcome::Unknown,
                Some(entry) => match entry.slot.try_send(payload) {
                    Ok(()) => {
                        tracing::debug!(
                            key = %key,
                            waited_ms = u64::try_from(entry.created_at.elapsed().as_millis())
                                .unwrap_or(u64::MAX),
                            "Reply delivered"
                        );
                        DeliveryOutcome::Delivered
                    },
                    Err(TrySendError::Full(_) | TrySendError::Closed(_)) => {
                        DeliveryOutcome::Discarded
                    },
                },
            }
        };

        if outcome != DeliveryOutcome::Delivered {
            tracing::debug!(key = %key, outcome = outcome.as_str(), "Reply discarded");
            CorrelatorMetrics::record_discarded(outcome.as_str());
        }
        outcome
    }

    /// Stop accepting requests and drain the pending table.
    ///
    /// Callers still waiting return [`BridgeError::Closed`] immediately.
    /// Calling `close` more than once is harmless.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = {
            let mut table = self.table();
            let drained = table.len();
            table.clear();
            drained
        };
        CorrelatorMetrics::set_pending(0);
        tracing::info!(
            request_topic = %self.request_topic,
            drained,
            "Correlator closed"
        );
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests currently waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Whether a request with `key` is currently waiting for a reply.
    #[must_use]
    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.table().contains_key(key)
    }

    async fn exchange(
        &self,
        cancel: &CancellationToken,
        key: CorrelationKey,
        payload: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, BridgeError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let (_registration, mut slot) = self.register(&key)?;

        let published = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BridgeError::Cancelled { key }),
            published = self.transport.publish(&self.request_topic, &key, payload) => published,
        };
        if let Err(source) = published {
            tracing::error!(
                key = %key,
                topic = %self.request_topic,
                error = %source,
                "Failed to publish request"
            );
            return Err(BridgeError::Publish { key, source });
        }
        tracing::debug!(key = %key, topic = %self.request_topic, "Request published");

        let outcome = tokio::select! {
            biased;
            reply = slot.recv() => reply.ok_or(BridgeError::Closed),
            () = cancel.cancelled() => {
                tracing::debug!(key = %key, "Request cancelled");
                Err(BridgeError::Cancelled { key })
            },
            () = tokio::time::sleep(timeout) => {
                tracing::warn!(key = %key, timeout = ?timeout, "Timed out waiting for reply");
                Err(BridgeError::Timeout { key, after: timeout })
            },
        };
        settle(outcome, &mut slot)
    }

    /// Insert a pending entry for `key`.
    ///
    /// The returned guard removes the entry when dropped.
    fn register(
        &self,
        key: &CorrelationKey,
    ) -> Result<(Registration<'_>, mpsc::Receiver<Vec<u8>>), BridgeError> {
        if key.is_empty() {
            return Err(BridgeError::EmptyKey);
        }

        let (tx, rx) = mpsc::channel(1);
        let pending = {
            let mut table = self.table();
            // Checked under the lock so close() and register() cannot interleave.
            if self.is_closed() {
                return Err(BridgeError::Closed);
            }
            if table.contains_key(key) {
                return Err(BridgeError::DuplicateKey(key.clone()));
            }
            if let Some(limit) = self.max_pending {
                if table.len() >= limit {
                    return Err(BridgeError::CapacityExceeded { limit });
                }
            }
            table.insert(
                key.clone(),
                PendingRequest {
                    slot: tx,
                    created_at: Instant::now(),
                },
            );
            table.len()
        };
        CorrelatorMetrics::set_pending(pending);

        Ok((
            Registration {
                correlator: self,
                key: key.clone(),
            },
            rx,
        ))
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Close the slot once the wait is over.
///
/// From here on `deliver` sees a closed slot and reports `Discarded`. A reply
/// that was delivered while the wait was ending is still in the slot; it is
/// returned so every `Delivered` reply reaches its caller.
fn settle(
    outcome: Result<Vec<u8>, BridgeError>,
    slot: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<Vec<u8>, BridgeError> {
    slot.close();
    match outcome {
        Ok(reply) => Ok(reply),
        Err(err) => match slot.try_recv() {
            Ok(reply) => {
                tracing::debug!(error = %err, "Reply arrived as the wait ended");
                Ok(reply)
            },
            Err(_) => Err(err),
        },
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("request_topic", &self.request_topic)
            .field("default_timeout", &self.default_timeout)
            .field("max_pending", &self.max_pending)
            .field("reply_format", &self.reply_format)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Removes a pending entry when the waiting call ends, however it ends.
struct Registration<'a> {
    correlator: &'a Correlator,
    key: CorrelationKey,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let pending = {
            let mut table = self.correlator.table();
            table.remove(&self.key);
            table.len()
        };
        CorrelatorMetrics::set_pending(pending);
    }
}
