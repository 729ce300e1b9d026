//! # Reply Bridge Runtime
//!
//! The moving parts of the request/reply bridge, built on the vocabulary of
//! `reply-bridge-core`.
//!
//! ## Core Components
//!
//! - **[`Correlator`]**: Publishes a request under a correlation key and parks
//!   the caller until the matching reply, a timeout or cancellation
//! - **[`ReplyRouter`]**: Single reader of the reply topic, hands every reply
//!   to the correlator
//! - **[`BridgeClient`]**: Correlator plus a running router, for callers
//! - **[`DispatchLoop`]**: Receiving side; runs a [`Handler`] per request with
//!   bounded concurrency and always answers with a reply
//! - **[`BridgeConfig`]**: Environment-driven configuration of both ends
//!
//! ## Example
//!
//! ```ignore
//! use reply_bridge_runtime::{BridgeClient, BridgeConfig};
//! use reply_bridge_core::{CancellationToken, CorrelationKey};
//!
//! let config = BridgeConfig::from_env()?;
//! let client = BridgeClient::connect(
//!     transport.clone(),
//!     &config.response_topic,
//!     config.correlator(transport),
//! )
//! .await?;
//!
//! let reply = client
//!     .call(&CancellationToken::new(), CorrelationKey::generate(), b"{...}", None)
//!     .await?;
//! ```

/// Sender-side client facade
pub mod client;

/// Environment configuration
pub mod config;

/// Pending-request table and the request/reply exchange
pub mod correlator;

/// Receiver-side dispatch loop
pub mod dispatch;

/// Prometheus metrics for observability
pub mod metrics;

/// Reply topic reader
pub mod router;

pub use client::BridgeClient;
pub use config::{BridgeConfig, ConfigError};
pub use correlator::{Correlator, DEFAULT_REPLY_TIMEOUT, DeliveryOutcome};
pub use dispatch::{
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_MAX_IN_FLIGHT, DispatchLoop, DispatchReport, Handler,
    HandlerFuture, ShutdownMode,
};
pub use router::{ReplyRouter, RouterReport};
