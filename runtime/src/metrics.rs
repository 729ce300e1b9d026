//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the bridge components:
//! - Correlator requests, outcomes and pending table size
//! - Reply routing (received and discarded replies)
//! - Dispatch loop throughput, handler results and reply publish failures
//!
//! Recording is always safe: without an installed recorder the macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use reply_bridge_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Either installs a recorder whose output is rendered on demand
/// ([`start`](Self::start)), or installs a recorder together with an HTTP
/// listener for Prometheus scraping ([`serve`](Self::serve)).
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder without an HTTP listener.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the
    /// existing recorder keeps collecting and no handle is stored.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Install the recorder and serve `/metrics` on the configured address.
    ///
    /// Must be called from within a tokio runtime; the listener runs as a
    /// background task.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn serve(&self) -> Result<(), MetricsError> {
        register_metrics();

        builder()?
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder wasn't installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Register all metric descriptions.
fn register_metrics() {
    // Correlator
    describe_counter!(
        "reply_bridge_requests_total",
        "Total number of request/reply calls, labelled by outcome"
    );
    describe_histogram!(
        "reply_bridge_request_duration_seconds",
        "Time from registration until the call returned"
    );
    describe_gauge!(
        "reply_bridge_pending_requests",
        "Requests currently waiting for a reply"
    );
    describe_counter!(
        "reply_bridge_replies_discarded_total",
        "Replies dropped because no caller was waiting for them"
    );

    // Reply router
    describe_counter!(
        "reply_bridge_replies_received_total",
        "Total number of reply envelopes read by the reply router"
    );

    // Dispatch loop
    describe_counter!(
        "reply_bridge_dispatch_received_total",
        "Total number of request envelopes accepted by the dispatch loop"
    );
    describe_counter!(
        "reply_bridge_dispatch_handled_total",
        "Total number of handler invocations, labelled by result"
    );
    describe_histogram!(
        "reply_bridge_dispatch_handler_duration_seconds",
        "Time taken by handler invocations"
    );
    describe_counter!(
        "reply_bridge_dispatch_reply_failures_total",
        "Replies that could not be published"
    );
    describe_gauge!(
        "reply_bridge_dispatch_in_flight",
        "Handler invocations currently running"
    );
    describe_counter!(
        "reply_bridge_transport_read_errors_total",
        "Non-terminal errors returned while reading a subscription"
    );
}

/// Correlator metrics recorder.
pub struct CorrelatorMetrics;

impl CorrelatorMetrics {
    /// Record a finished call and its outcome.
    pub fn record_request(outcome: &'static str, duration: Duration) {
        counter!("reply_bridge_requests_total", "outcome" => outcome).increment(1);
        histogram!("reply_bridge_request_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record the current size of the pending table.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_pending(count: usize) {
        gauge!("reply_bridge_pending_requests").set(count as f64);
    }

    /// Record a reply that no caller received.
    pub fn record_discarded(reason: &'static str) {
        counter!("reply_bridge_replies_discarded_total", "reason" => reason).increment(1);
    }
}

/// Reply router metrics recorder.
pub struct RouterMetrics;

impl RouterMetrics {
    /// Record a reply envelope read from the reply topic.
    pub fn record_received() {
        counter!("reply_bridge_replies_received_total").increment(1);
    }

    /// Record a non-terminal read error.
    pub fn record_read_error() {
        counter!("reply_bridge_transport_read_errors_total", "reader" => "router").increment(1);
    }
}

/// Dispatch loop metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record an accepted request envelope.
    pub fn record_received() {
        counter!("reply_bridge_dispatch_received_total").increment(1);
    }

    /// Record a finished handler invocation.
    ///
    /// `result` is `"success"` or a handler error kind label.
    pub fn record_handled(result: &'static str, duration: Duration) {
        counter!("reply_bridge_dispatch_handled_total", "result" => result).increment(1);
        histogram!("reply_bridge_dispatch_handler_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a reply that could not be published.
    pub fn record_reply_failure() {
        counter!("reply_bridge_dispatch_reply_failures_total").increment(1);
    }

    /// Record the number of running handler invocations.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_in_flight(count: usize) {
        gauge!("reply_bridge_dispatch_in_flight").set(count as f64);
    }

    /// Record a non-terminal read error.
    pub fn record_read_error() {
        counter!("reply_bridge_transport_read_errors_total", "reader" => "dispatch").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        CorrelatorMetrics::record_request("replied", Duration::from_millis(20));
        CorrelatorMetrics::record_discarded("unknown_key");
        DispatchMetrics::record_handled("success", Duration::from_millis(5));

        // If another test installed the recorder first, handle is None.
        // Metrics are still recorded globally in that case.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("reply_bridge_requests_total"));
            assert!(rendered.contains("reply_bridge_replies_discarded_total"));
            assert!(rendered.contains("reply_bridge_dispatch_handled_total"));
        }
    }

    #[test]
    fn every_exported_metric_uses_the_crate_prefix() {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            CorrelatorMetrics::record_request("timeout", Duration::from_millis(1));
            CorrelatorMetrics::set_pending(1);
            RouterMetrics::record_received();
            DispatchMetrics::record_received();
            DispatchMetrics::set_in_flight(2);
        });

        let rendered = handle.render();
        assert!(rendered.contains("reply_bridge_dispatch_in_flight"));
        for line in rendered.lines().filter(|line| !line.is_empty() && !line.starts_with('#')) {
            assert!(line.starts_with("reply_bridge_"), "unprefixed metric: {line}");
        }
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        CorrelatorMetrics::set_pending(3);
        RouterMetrics::record_received();
        DispatchMetrics::set_in_flight(1);
    }
}
