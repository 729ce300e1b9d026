//! Redpanda transport for the reply bridge.
//!
//! This crate implements the [`Transport`] trait from `reply-bridge-core` on top
//! of rdkafka, so it works against Redpanda, Apache Kafka or any other
//! Kafka-compatible broker.
//!
//! # Record layout
//!
//! - message key: the correlation key bytes
//! - message value: the payload, opaque to the transport
//!
//! Requests and replies for one key land on the same partition, so the broker
//! keeps them in publish order.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the record is handed to the subscription's channel
//! - If the process crashes before commit, records will be redelivered
//! - Handlers MUST be idempotent on their business identifier
//!
//! `subscribe` returns only once the group has assigned partitions to the new
//! consumer (or `assignment_timeout` passed). With `auto.offset.reset=latest`
//! a record published before the assignment would otherwise be skipped, so a
//! reply could be lost to the caller that is about to publish its request.
//!
//! **Configuration options**:
//! - `consumer_group`: Durable group identity (default: `reply-bridge-<topic>`)
//! - `assignment_timeout`: How long `subscribe` waits for partitions (default: 30s)
//! - `buffer_size`: Records buffered per subscription (default: 1000)
//! - `auto_offset_reset`: Where a new group starts reading (default: "latest")
//!
//! # Example
//!
//! ```no_run
//! use reply_bridge_core::{CancellationToken, CorrelationKey, Transport};
//! use reply_bridge_redpanda::RedpandaTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = RedpandaTransport::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("payment-service")
//!     .build()?;
//!
//! transport
//!     .publish("payments.requests", &CorrelationKey::generate(), b"{}")
//!     .await?;
//!
//! let mut replies = transport.subscribe("payments.replies").await?;
//! let envelope = replies.read(&CancellationToken::new()).await?;
//! println!("reply for {}", envelope.key);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use reply_bridge_core::{
    CorrelationKey, Envelope, Subscription, Transport, TransportError, TransportFuture,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const DEFAULT_ACKS: &str = "all";
const DEFAULT_COMPRESSION: &str = "none";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_OFFSET_RESET: &str = "latest";
const DEFAULT_ASSIGNMENT_TIMEOUT: Duration = Duration::from_secs(30);
const ASSIGNMENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Kafka/Redpanda [`Transport`].
///
/// Publishing goes through one shared producer. Every call to
/// [`subscribe`](Transport::subscribe) creates its own consumer in the
/// configured group; a background task owns it and forwards records into the
/// returned [`Subscription`].
///
/// # Example
///
/// ```no_run
/// use reply_bridge_redpanda::RedpandaTransport;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Basic configuration
/// let transport = RedpandaTransport::new("localhost:9092")?;
///
/// // Custom configuration
/// let transport = RedpandaTransport::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaTransport {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    buffer_size: usize,
    auto_offset_reset: String,
    assignment_timeout: Duration,
}

impl RedpandaTransport {
    /// Create a transport with default configuration.
    ///
    /// # Parameters
    ///
    /// - `brokers`: Comma-separated list of broker addresses (e.g., "localhost:9092")
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, TransportError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the transport.
    #[must_use]
    pub fn builder() -> RedpandaTransportBuilder {
        RedpandaTransportBuilder::default()
    }

    /// Broker addresses this transport connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group used for `topic`.
    #[must_use]
    pub fn consumer_group_for(&self, topic: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("reply-bridge-{topic}"))
    }

    fn consumer(&self, topic: &str, group: &str) -> Result<StreamConsumer, TransportError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| TransportError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| TransportError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: format!("Failed to subscribe to topic: {e}"),
            })?;

        Ok(consumer)
    }
}

impl std::fmt::Debug for RedpandaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaTransport")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .field("consumer_group", &self.consumer_group)
            .field("buffer_size", &self.buffer_size)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .field("assignment_timeout", &self.assignment_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring a [`RedpandaTransport`].
///
/// # Example
///
/// ```no_run
/// use reply_bridge_redpanda::RedpandaTransport;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = RedpandaTransport::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("payment-service")
///     .timeout(Duration::from_secs(10))
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct RedpandaTransportBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    assignment_timeout: Option<Duration>,
}

impl RedpandaTransportBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// The group is the durable identity of this process on the log: after a
    /// restart, subscriptions resume from the group's committed offsets. When
    /// unset, each topic gets the group `reply-bridge-<topic>`.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many records can be buffered between the consumer and the reader.
    ///
    /// Default: 1000
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where new consumer groups start reading: "earliest", "latest" or "error".
    ///
    /// Default: "latest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set how long `subscribe` waits for the group to assign partitions.
    ///
    /// A consumer left without partitions (more group members than
    /// partitions) stops waiting at this deadline and stays subscribed.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub const fn assignment_timeout(mut self, timeout: Duration) -> Self {
        self.assignment_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaTransport, TransportError> {
        let brokers = self
            .brokers
            .ok_or_else(|| TransportError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or(DEFAULT_ACKS);
        let compression = self.compression.as_deref().unwrap_or(DEFAULT_COMPRESSION);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| TransportError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            consumer_group = self.consumer_group.as_deref().unwrap_or("<per topic>"),
            auto_offset_reset = %auto_offset_reset,
            "RedpandaTransport created"
        );

        Ok(RedpandaTransport {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
            assignment_timeout: self.assignment_timeout.unwrap_or(DEFAULT_ASSIGNMENT_TIMEOUT),
        })
    }
}

impl Transport for RedpandaTransport {
    fn publish(&self, topic: &str, key: &CorrelationKey, value: &[u8]) -> TransportFuture<'_, ()> {
        let topic = topic.to_string();
        let key = key.clone();
        let value = value.to_vec();

        Box::pin(async move {
            let record = FutureRecord::to(&topic).key(key.as_bytes()).payload(&value);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition,
                        offset,
                        "Record published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish record"
                    );
                    Err(TransportError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(&self, topic: &str) -> TransportFuture<'_, Subscription> {
        let topic = topic.to_string();

        Box::pin(async move {
            let group = self.consumer_group_for(&topic);
            let consumer = Arc::new(self.consumer(&topic, &group)?);

            tracing::info!(
                topic = %topic,
                consumer_group = %group,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let (tx, rx) = mpsc::channel(self.buffer_size);
            // The forward task polls the consumer, which drives the group join.
            tokio::spawn(forward(Arc::clone(&consumer), tx));
            await_assignment(&consumer, &topic, self.assignment_timeout).await;

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Subscription::new(topic, Box::pin(stream)))
        })
    }
}

/// Wait until the group has given `consumer` at least one partition.
async fn await_assignment(consumer: &StreamConsumer, topic: &str, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        match consumer.assignment() {
            Ok(assignment) if assignment.count() > 0 => {
                tracing::info!(topic, partitions = assignment.count(), "Partitions assigned");
                return;
            },
            Ok(_) => {},
            Err(e) => {
                tracing::warn!(topic, error = %e, "Failed to read partition assignment");
                return;
            },
        }

        if Instant::now() >= deadline {
            tracing::warn!(
                topic,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "No partitions assigned before timeout, continuing without"
            );
            return;
        }
        tokio::time::sleep(ASSIGNMENT_POLL_INTERVAL).await;
    }
}

/// Owns the consumer and forwards records until the subscription is dropped.
async fn forward(consumer: Arc<StreamConsumer>, tx: mpsc::Sender<Result<Envelope, TransportError>>) {
    use futures::StreamExt;

    let mut stream = consumer.stream();

    loop {
        let message = tokio::select! {
            () = tx.closed() => break,
            message = stream.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            Ok(message) => {
                let record = to_envelope(&message);

                // Commit only after the record reached the channel.
                if tx.send(record).await.is_err() {
                    tracing::debug!(topic = message.topic(), "Subscription dropped, exiting consumer task");
                    break;
                }

                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset (record may be redelivered)"
                    );
                }
            },
            Err(e) => {
                let err = TransportError::ReceiveFailed(format!("Failed to receive record: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
            },
        }
    }

    tracing::debug!("Consumer task exiting");
}

fn to_envelope(message: &BorrowedMessage<'_>) -> Result<Envelope, TransportError> {
    let key = match message.key() {
        Some(key) if !key.is_empty() => CorrelationKey::from(key),
        _ => {
            return Err(TransportError::InvalidMessage(format!(
                "Record at {}/{}@{} has no key",
                message.topic(),
                message.partition(),
                message.offset()
            )));
        },
    };
    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

    tracing::trace!(
        topic = message.topic(),
        partition = message.partition(),
        offset = message.offset(),
        key = %key,
        "Received record"
    );

    Ok(Envelope::new(message.topic(), key, payload))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_transport_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaTransport>();
        assert_sync::<RedpandaTransport>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let err = RedpandaTransport::builder().build().unwrap_err();
        assert_eq!(
            err,
            TransportError::ConnectionFailed("Brokers not configured".to_string())
        );
    }

    #[test]
    fn consumer_group_defaults_per_topic() {
        // Creating a producer does not contact the broker.
        let transport = RedpandaTransport::new("localhost:9092").unwrap();
        assert_eq!(transport.consumer_group_for("payments.replies"), "reply-bridge-payments.replies");

        let transport = RedpandaTransport::builder()
            .brokers("localhost:9092")
            .consumer_group("payment-service")
            .build()
            .unwrap();
        assert_eq!(transport.consumer_group_for("payments.requests"), "payment-service");
        assert_eq!(transport.brokers(), "localhost:9092");
    }

    #[test]
    fn assignment_timeout_defaults_and_overrides() {
        let transport = RedpandaTransport::new("localhost:9092").unwrap();
        assert_eq!(transport.assignment_timeout, DEFAULT_ASSIGNMENT_TIMEOUT);

        let transport = RedpandaTransport::builder()
            .brokers("localhost:9092")
            .assignment_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(transport.assignment_timeout, Duration::from_secs(2));
    }

    #[test]
    #[should_panic(expected = "buffer_size must be greater than 0")]
    fn zero_buffer_size_is_rejected() {
        let _ = RedpandaTransport::builder().buffer_size(0);
    }
}
