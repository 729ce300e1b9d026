//! In-memory transport for fast, deterministic tests.
//!
//! Behaves like a single-partition log per topic:
//! - every published record is appended and never removed
//! - each `(topic, consumer group)` pair owns a committed offset, advanced as
//!   records are read, so a new subscription in the same group resumes after
//!   the last record handed out
//! - a group seen for the first time starts at the end of the log
//!   ([`OffsetReset::Latest`], the default) or at its beginning
//!   ([`OffsetReset::Earliest`])
//!
//! Publishes to a topic can be made to fail with
//! [`fail_publishes`](InMemoryTransport::fail_publishes).

#![allow(clippy::missing_panics_doc)] // Test infrastructure recovers from poisoned locks

use reply_bridge_core::{
    CorrelationKey, Envelope, Subscription, Transport, TransportError, TransportFuture,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Where a consumer group without a committed offset starts reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OffsetReset {
    /// From the first record in the log
    Earliest,
    /// From the next record published
    #[default]
    Latest,
}

#[derive(Debug)]
struct TopicLog {
    records: Vec<Envelope>,
    appended: watch::Sender<usize>,
}

impl TopicLog {
    fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            records: Vec::new(),
            appended,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, TopicLog>,
    offsets: HashMap<(String, String), usize>,
    failing: HashMap<String, String>,
}

impl State {
    fn topic(&mut self, topic: &str) -> &mut TopicLog {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(TopicLog::new)
    }
}

/// In-memory [`Transport`].
///
/// Cloning is cheap; clones share the same logs and offsets. Use
/// [`with_consumer_group`](Self::with_consumer_group) to get a handle that
/// subscribes under a different group, as a second process would.
///
/// # Example
///
/// ```
/// use reply_bridge_core::{CancellationToken, CorrelationKey, Transport};
/// use reply_bridge_testing::InMemoryTransport;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = InMemoryTransport::new();
/// let mut replies = transport.subscribe("replies").await?;
///
/// transport
///     .publish("replies", &CorrelationKey::from("req-7"), b"OK")
///     .await?;
///
/// let envelope = replies.read(&CancellationToken::new()).await?;
/// assert_eq!(envelope.payload, b"OK");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
    group: String,
    offset_reset: OffsetReset,
}

impl InMemoryTransport {
    /// Group used by handles that never picked one.
    pub const DEFAULT_GROUP: &'static str = "default";

    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            group: Self::DEFAULT_GROUP.to_string(),
            offset_reset: OffsetReset::default(),
        }
    }

    /// A handle on the same logs that subscribes under `group`.
    #[must_use]
    pub fn with_consumer_group(&self, group: impl Into<String>) -> Self {
        Self {
            state: Arc::clone(&self.state),
            group: group.into(),
            offset_reset: self.offset_reset,
        }
    }

    /// Set where groups without a committed offset start reading.
    #[must_use]
    pub const fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    /// Consumer group of this handle.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.group
    }

    /// Make every publish to `topic` fail with `reason`.
    pub fn fail_publishes(&self, topic: impl Into<String>, reason: impl Into<String>) {
        self.lock().failing.insert(topic.into(), reason.into());
    }

    /// Let publishes to `topic` succeed again.
    pub fn clear_failures(&self, topic: &str) {
        self.lock().failing.remove(topic);
    }

    /// Every record published to `topic`, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<Envelope> {
        self.lock()
            .topics
            .get(topic)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    /// Number of records published to `topic`.
    #[must_use]
    pub fn len(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, |log| log.records.len())
    }

    /// `true` if nothing was published to `topic`.
    #[must_use]
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Committed offset of this handle's group on `topic`, if it ever subscribed.
    #[must_use]
    pub fn committed_offset(&self, topic: &str) -> Option<usize> {
        self.lock()
            .offsets
            .get(&(topic.to_string(), self.group.clone()))
            .copied()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, topic: &str, key: CorrelationKey, value: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(reason) = state.failing.get(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: reason.clone(),
            });
        }

        let log = state.topic(topic);
        log.records.push(Envelope::new(topic, key, value));
        let len = log.records.len();
        log.appended.send_replace(len);
        Ok(())
    }

    fn open(&self, topic: &str) -> Subscription {
        let (mut appended, start) = {
            let mut state = self.lock();
            let log = state.topic(topic);
            let appended = log.appended.subscribe();
            let end = log.records.len();
            let start = match self.offset_reset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest => end,
            };
            let committed = *state
                .offsets
                .entry((topic.to_string(), self.group.clone()))
                .or_insert(start);
            (appended, committed)
        };

        tracing::debug!(topic, group = %self.group, offset = start, "In-memory subscription opened");

        let state = Arc::clone(&self.state);
        let offset_key = (topic.to_string(), self.group.clone());
        let stream = async_stream::stream! {
            loop {
                let _seen = *appended.borrow_and_update();
                let next = {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    let State { topics, offsets, .. } = &mut *state;
                    let offset = offsets.entry(offset_key.clone()).or_insert(0);
                    let record = topics
                        .get(&offset_key.0)
                        .and_then(|log| log.records.get(*offset))
                        .cloned();
                    if record.is_some() {
                        *offset += 1;
                    }
                    record
                };

                match next {
                    Some(envelope) => yield Ok(envelope),
                    None => {
                        if appended.changed().await.is_err() {
                            break;
                        }
                    },
                }
            }
        };

        Subscription::new(topic, Box::pin(stream))
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for InMemoryTransport {
    fn publish(&self, topic: &str, key: &CorrelationKey, value: &[u8]) -> TransportFuture<'_, ()> {
        let topic = topic.to_string();
        let key = key.clone();
        let value = value.to_vec();
        Box::pin(async move { self.append(&topic, key, value) })
    }

    fn subscribe(&self, topic: &str) -> TransportFuture<'_, Subscription> {
        let topic = topic.to_string();
        Box::pin(async move { Ok(self.open(&topic)) })
    }
}
