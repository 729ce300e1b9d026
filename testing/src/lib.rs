//! # Reply Bridge Testing
//!
//! Testing utilities for the reply bridge.
//!
//! This crate provides:
//! - [`InMemoryTransport`]: a log-like transport with consumer-group offsets
//!   and publish fault injection
//! - Deterministic timestamps for building domain fixtures
//! - A `tracing` subscriber wired to the test output
//!
//! ## Example
//!
//! ```ignore
//! use reply_bridge_testing::{InMemoryTransport, init_tracing};
//! use reply_bridge_runtime::{BridgeClient, Correlator};
//!
//! #[tokio::test]
//! async fn test_round_trip() {
//!     init_tracing();
//!     let transport = Arc::new(InMemoryTransport::new());
//!     let correlator = Correlator::new(transport.clone(), "requests");
//!     let client = BridgeClient::connect(transport, "replies", correlator).await.unwrap();
//!     // ...
//! }
//! ```

/// In-memory transport
pub mod transport;

/// Mock implementations and helpers for tests.
pub mod mocks {
    use chrono::{DateTime, Utc};

    /// Fixed timestamp for deterministic fixtures (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_timestamp() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Route `tracing` output to the test harness.
    ///
    /// Honours `RUST_LOG`; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{init_tracing, test_timestamp};
pub use transport::{InMemoryTransport, OffsetReset};
