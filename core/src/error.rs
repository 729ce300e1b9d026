//! Error taxonomy for the bridge.
//!
//! Two families exist and they never mix:
//!
//! - [`BridgeError`] is returned to the caller of a request: the request could
//!   not be published, no reply arrived in time, or the caller gave up.
//! - [`HandlerError`] is produced by business handlers on the receiving side.
//!   It is never propagated as a transport fault; the dispatch loop turns it
//!   into a failure reply that the original caller receives as data.
//!
//! A reply that arrives for an unknown key (late reply after a timeout,
//! duplicate reply) is not an error anywhere: the correlator discards it and
//! only logs and counts it.

use crate::key::CorrelationKey;
use crate::reply::ReplyCodecError;
use crate::transport::TransportError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors returned to callers of the correlator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The correlation key has no bytes
    #[error("Correlation key must not be empty")]
    EmptyKey,

    /// A request with this key is already waiting for its reply
    #[error("A request with correlation key '{0}' is already pending")]
    DuplicateKey(CorrelationKey),

    /// The pending table is full
    #[error("Too many pending requests (limit {limit})")]
    CapacityExceeded {
        /// Configured ceiling on outstanding requests
        limit: usize,
    },

    /// The transport rejected the request; no wait was performed
    #[error("Failed to publish request '{key}': {source}")]
    Publish {
        /// Key of the request that could not be published
        key: CorrelationKey,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// No reply arrived before the deadline
    #[error("Timed out after {after:?} waiting for reply to '{key}'")]
    Timeout {
        /// Key of the request that timed out
        key: CorrelationKey,
        /// The deadline that elapsed
        after: Duration,
    },

    /// The caller cancelled before a reply or the deadline
    #[error("Request '{key}' was cancelled before a reply arrived")]
    Cancelled {
        /// Key of the cancelled request
        key: CorrelationKey,
    },

    /// The correlator has been closed
    #[error("Correlator is closed")]
    Closed,

    /// A reply arrived but could not be decoded
    #[error("Failed to decode reply for '{key}': {source}")]
    Decode {
        /// Key of the request whose reply was malformed
        key: CorrelationKey,
        /// Decoding failure
        #[source]
        source: ReplyCodecError,
    },
}

impl BridgeError {
    /// Short label used for logging and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::EmptyKey => "empty_key",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Publish { .. } => "publish_error",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Closed => "closed",
            Self::Decode { .. } => "decode_error",
        }
    }
}

/// Stable classification of business handler failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerErrorKind {
    /// The request payload is malformed or violates a business rule
    Validation,
    /// The account cannot cover the requested amount
    InsufficientFunds,
    /// The referenced entity does not exist
    NotFound,
    /// Anything else (storage failure, handler panic, ...)
    Internal,
}

impl HandlerErrorKind {
    /// Label used for logging and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::InsufficientFunds => "insufficient_funds",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for HandlerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by a business handler.
///
/// `Display` is the bare message: it is what the dispatch loop writes into
/// the failure reply, verbatim.
///
/// # Example
///
/// ```
/// use reply_bridge_core::{HandlerError, HandlerErrorKind};
///
/// let err = HandlerError::insufficient_funds("insufficient funds");
/// assert_eq!(err.kind(), HandlerErrorKind::InsufficientFunds);
/// assert_eq!(err.to_string(), "insufficient funds");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    kind: HandlerErrorKind,
    message: String,
}

impl HandlerError {
    /// Create an error of the given kind.
    #[must_use]
    pub fn new(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Validation, message)
    }

    /// Insufficient funds.
    #[must_use]
    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::InsufficientFunds, message)
    }

    /// Entity not found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::NotFound, message)
    }

    /// Internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::Internal, message)
    }

    /// The error classification.
    #[must_use]
    pub const fn kind(&self) -> HandlerErrorKind {
        self.kind
    }

    /// The message carried in the failure reply.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_display_is_verbatim() {
        let err = HandlerError::validation("invalid JSON: expected value at line 1 column 1");
        assert_eq!(err.to_string(), "invalid JSON: expected value at line 1 column 1");
        assert_eq!(err.kind().as_str(), "validation");
    }

    #[test]
    fn bridge_error_messages_name_the_key() {
        let err = BridgeError::Timeout {
            key: CorrelationKey::from("req-7"),
            after: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "Timed out after 60s waiting for reply to 'req-7'");
        assert_eq!(err.label(), "timeout");
    }

    #[test]
    fn publish_error_keeps_its_source() {
        use std::error::Error as _;

        let err = BridgeError::Publish {
            key: CorrelationKey::from("req-1"),
            source: TransportError::PublishFailed {
                topic: "requests".to_string(),
                reason: "broker down".to_string(),
            },
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("broker down"));
    }
}
