//! Transport abstraction over a partition-ordered log.
//!
//! The bridge needs exactly two primitives from the underlying log:
//!
//! - `publish(topic, key, value)`: append one keyed record to a topic
//! - `read(cancel)`: block until the next record of a subscribed topic arrives
//!
//! No retries, no batching and no business semantics live here. Those are the
//! concern of the concrete client (rdkafka, an in-memory log in tests, ...).
//!
//! # Implementations
//!
//! - `InMemoryTransport` (`reply-bridge-testing`) - append-only in-process log
//! - `RedpandaTransport` (`reply-bridge-redpanda`) - Kafka-compatible brokers
//!
//! # Example
//!
//! ```rust,ignore
//! use reply_bridge_core::{CancellationToken, CorrelationKey, Transport};
//!
//! async fn example(transport: &dyn Transport) -> Result<(), TransportError> {
//!     let cancel = CancellationToken::new();
//!     let mut replies = transport.subscribe("payments.replies").await?;
//!
//!     transport
//!         .publish("payments.requests", &CorrelationKey::from("req-7"), b"{}")
//!         .await?;
//!
//!     let envelope = replies.read(&cancel).await?;
//!     println!("reply for {}", envelope.key);
//!     Ok(())
//! }
//! ```

use crate::envelope::Envelope;
use crate::key::CorrelationKey;
use futures::{Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to connect to the transport
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a record to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// A record could not be received
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A record was received but cannot be turned into an envelope
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The read was interrupted by cancellation
    #[error("Read cancelled")]
    Cancelled,

    /// The subscription stream ended
    #[error("Subscription to '{topic}' closed")]
    Closed {
        /// The topic whose stream ended
        topic: String,
    },
}

impl TransportError {
    /// Whether a reader should stop after this error.
    ///
    /// Cancellation and a closed stream end the read loop; everything else is a
    /// per-record problem and the loop keeps going.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed { .. })
    }
}

/// Stream of envelopes from one subscribed topic.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<Envelope, TransportError>> + Send>>;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Minimal publish/subscribe primitive over a partition-ordered log.
///
/// # Delivery
///
/// Implementations deliver records at least once and preserve order within a
/// partition. Records with the same key land on the same partition.
///
/// # Consumer Groups
///
/// Subscriptions use a durable consumer-group identity configured on the
/// transport, so a restarted process resumes after the last committed record
/// instead of replaying the topic from the beginning.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the transport
/// can be shared as `Arc<dyn Transport>` between the correlator, the reply
/// router and the dispatch loop.
pub trait Transport: Send + Sync {
    /// Append one keyed record to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] if the record is rejected.
    fn publish(&self, topic: &str, key: &CorrelationKey, value: &[u8]) -> TransportFuture<'_, ()>;

    /// Subscribe to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(&self, topic: &str) -> TransportFuture<'_, Subscription>;
}

/// A live subscription to one topic.
///
/// Wraps the transport's [`EnvelopeStream`] with a cancellable blocking
/// [`read`](Self::read).
pub struct Subscription {
    topic: String,
    stream: EnvelopeStream,
}

impl Subscription {
    /// Wrap a stream of envelopes read from `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>, stream: EnvelopeStream) -> Self {
        Self {
            topic: topic.into(),
            stream,
        }
    }

    /// The subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Block until the next envelope arrives or `cancel` fires.
    ///
    /// Cancellation takes priority: once the token is cancelled every call
    /// returns [`TransportError::Cancelled`] even if records are buffered.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Cancelled`] when `cancel` fires
    /// - [`TransportError::Closed`] when the underlying stream ends
    /// - any per-record error produced by the transport
    pub async fn read(&mut self, cancel: &CancellationToken) -> Result<Envelope, TransportError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            next = self.stream.next() => match next {
                Some(result) => result,
                None => Err(TransportError::Closed {
                    topic: self.topic.clone(),
                }),
            },
        }
    }

    /// Consume the subscription and return the raw stream.
    #[must_use]
    pub fn into_stream(self) -> EnvelopeStream {
        self.stream
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
