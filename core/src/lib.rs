//! # Reply Bridge Core
//!
//! Core types and traits for exchanging synchronous-looking request/reply calls
//! over an asynchronous, partition-ordered log transport (Kafka, Redpanda, ...).
//!
//! The log offers no native request/response addressing. The bridge pairs a
//! request with its reply through a [`CorrelationKey`]: the request is published
//! with the key, the remote side publishes its reply with the same key on a
//! second topic, and the sender matches the two.
//!
//! ## Core Concepts
//!
//! - **[`CorrelationKey`]**: Identifier linking one request to its eventual reply
//! - **[`Envelope`]**: The `(topic, key, payload)` unit exchanged over the transport
//! - **[`Reply`]**: Tagged success/failure result carried in a reply envelope
//! - **[`Transport`]**: Minimal publish/subscribe primitive underneath the bridge
//! - **[`HandlerError`]**: Stable error classification returned by business handlers
//!
//! ## Architecture
//!
//! ```text
//!      calling service                          handling service
//! ┌──────────────────────┐                ┌──────────────────────┐
//! │ Correlator           │  request topic │ Dispatch Loop        │
//! │  send_and_await(k) ──┼───────────────►│  read ─► handler     │
//! │                      │                │            │         │
//! │ Reply Router         │   reply topic  │            ▼         │
//! │  deliver(k) ◄────────┼────────────────┼─ publish reply (k)   │
//! └──────────────────────┘                └──────────────────────┘
//! ```
//!
//! The correlator, router and dispatch loop live in `reply-bridge-runtime`;
//! this crate only holds the vocabulary they share.

pub mod envelope;
pub mod error;
pub mod key;
pub mod reply;
pub mod transport;

pub use envelope::Envelope;
pub use error::{BridgeError, HandlerError, HandlerErrorKind};
pub use key::CorrelationKey;
pub use reply::{LEGACY_SUCCESS_MARKER, Reply, ReplyCodecError, ReplyFormat};
pub use transport::{EnvelopeStream, Subscription, Transport, TransportError, TransportFuture};

// Re-exported so downstream crates share one cancellation type.
pub use tokio_util::sync::CancellationToken;
