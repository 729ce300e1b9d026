//! The unit exchanged over the transport.

use crate::key::CorrelationKey;

/// A keyed payload read from or written to a topic.
///
/// Request envelopes carry the serialized business payload; reply envelopes
/// reuse the request's key and carry an encoded [`Reply`](crate::Reply).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Topic the envelope was read from (or is destined for)
    pub topic: String,
    /// Correlation key, also the record key on the transport
    pub key: CorrelationKey,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: CorrelationKey, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
        }
    }

    /// Build the reply to this envelope: same key, new topic and payload.
    ///
    /// # Example
    ///
    /// ```
    /// use reply_bridge_core::{CorrelationKey, Envelope};
    ///
    /// let request = Envelope::new("payments.requests", CorrelationKey::from("req-7"), b"{}".to_vec());
    /// let reply = request.reply_on("payments.replies", b"OK".to_vec());
    ///
    /// assert_eq!(reply.key, request.key);
    /// assert_eq!(reply.topic, "payments.replies");
    /// ```
    #[must_use]
    pub fn reply_on(&self, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: self.key.clone(),
            payload,
        }
    }
}
