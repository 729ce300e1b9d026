//! Receiver-side dispatch loop.
//!
//! A single reader pulls request envelopes in order, and every envelope is
//! handed to its own handler task so a slow handler never stalls ingestion.
//! Whatever the handler returns, the loop publishes a reply keyed identically
//! to the request: a request that was accepted is never silently dropped.
//!
//! # Bounded fan-out
//!
//! At most `max_in_flight` handler tasks run at once. The reader acquires a
//! permit *before* reading the next record, so when every slot is busy the
//! loop simply stops pulling from the transport (back-pressure) instead of
//! buffering an unbounded number of tasks.
//!
//! # Shutdown
//!
//! Cancellation stops the reader; it never preempts running handlers.
//! What happens to them is set by [`ShutdownMode`]:
//!
//! - [`ShutdownMode::Drain`] (default) waits for them, up to a timeout, and
//!   aborts whatever is still running afterwards
//! - [`ShutdownMode::Detach`] returns immediately and leaves them running
//!   unawaited on the runtime

use crate::metrics::DispatchMetrics;
use futures::FutureExt;
use reply_bridge_core::{
    CancellationToken, Envelope, HandlerError, Reply, ReplyFormat, Subscription, Transport,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default number of concurrently running handler invocations.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Default time to wait for in-flight handlers during shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed future returned by [`Handler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, HandlerError>> + Send + 'a>>;

/// Business logic invoked once per request envelope.
///
/// On success the returned bytes become the payload of a
/// [`Reply::Success`]; on failure the error's message becomes a
/// [`Reply::Failure`], verbatim.
///
/// Handlers must be idempotent on their own business identifier: the
/// transport delivers at least once, and the bridge does not deduplicate.
///
/// Any `Fn(Envelope) -> impl Future<Output = Result<Vec<u8>, HandlerError>>`
/// closure is a handler:
///
/// ```rust,ignore
/// let handler = |envelope: Envelope| async move {
///     Ok::<_, HandlerError>(envelope.payload)
/// };
/// let dispatch = DispatchLoop::new(transport, "echo.replies", Arc::new(handler));
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handle one request envelope.
    ///
    /// # Errors
    ///
    /// Returns a classified [`HandlerError`] when the request cannot be served.
    fn handle(&self, envelope: Envelope) -> HandlerFuture<'_>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, HandlerError>> + Send + 'static,
{
    fn handle(&self, envelope: Envelope) -> HandlerFuture<'_> {
        Box::pin(self(envelope))
    }
}

/// What happens to running handlers once the reader stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Wait up to the given duration, then abort the remaining handlers
    Drain(Duration),
    /// Return immediately and leave running handlers unawaited
    Detach,
}

impl Default for ShutdownMode {
    fn default() -> Self {
        Self::Drain(DEFAULT_DRAIN_TIMEOUT)
    }
}

/// Counters collected while a dispatch loop runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Request envelopes accepted for processing
    pub received: u64,
    /// Replies successfully published
    pub replied: u64,
    /// Handler invocations that returned an error (or panicked)
    pub handler_failures: u64,
    /// Replies that could not be encoded or published
    pub reply_failures: u64,
    /// Non-terminal read errors
    pub read_errors: u64,
    /// Handlers aborted because the drain timeout elapsed
    pub aborted: u64,
    /// Handlers still running when the loop returned (only `Detach` leaves any)
    pub in_flight: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    replied: AtomicU64,
    handler_failures: AtomicU64,
    reply_failures: AtomicU64,
    read_errors: AtomicU64,
    aborted: AtomicU64,
    in_flight: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> DispatchReport {
        DispatchReport {
            received: self.received.load(Ordering::SeqCst),
            replied: self.replied.load(Ordering::SeqCst),
            handler_failures: self.handler_failures.load(Ordering::SeqCst),
            reply_failures: self.reply_failures.load(Ordering::SeqCst),
            read_errors: self.read_errors.load(Ordering::SeqCst),
            aborted: self.aborted.load(Ordering::SeqCst),
            in_flight: u64::try_from(self.in_flight.load(Ordering::SeqCst)).unwrap_or(u64::MAX),
        }
    }
}

/// Turns inbound request envelopes into handler invocations and replies.
///
/// # Example
///
/// ```rust,ignore
/// use reply_bridge_runtime::{DispatchLoop, ShutdownMode};
///
/// let requests = transport.subscribe("payments.requests").await?;
/// let dispatch = DispatchLoop::new(transport, "payments.replies", Arc::new(handler))
///     .with_max_in_flight(32)
///     .with_shutdown(ShutdownMode::Drain(Duration::from_secs(10)));
///
/// let report = dispatch.run(requests, shutdown_token).await;
/// ```
pub struct DispatchLoop {
    transport: Arc<dyn Transport>,
    reply_topic: String,
    handler: Arc<dyn Handler>,
    max_in_flight: usize,
    reply_format: ReplyFormat,
    shutdown: ShutdownMode,
}

impl DispatchLoop {
    /// Create a loop that publishes replies to `reply_topic`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        reply_topic: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            transport,
            reply_topic: reply_topic.into(),
            handler,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            reply_format: ReplyFormat::default(),
            shutdown: ShutdownMode::default(),
        }
    }

    /// Bound the number of concurrently running handlers.
    ///
    /// # Panics
    ///
    /// Panics if `max_in_flight` is 0.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        assert!(max_in_flight > 0, "max_in_flight must be greater than 0");
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set the wire format of reply payloads.
    #[must_use]
    pub const fn with_reply_format(mut self, format: ReplyFormat) -> Self {
        self.reply_format = format;
        self
    }

    /// Set what happens to running handlers when the reader stops.
    #[must_use]
    pub const fn with_shutdown(mut self, shutdown: ShutdownMode) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Read `subscription` until `cancel` fires or the stream closes, then
    /// shut down according to the configured [`ShutdownMode`].
    pub async fn run(&self, mut subscription: Subscription, cancel: CancellationToken) -> DispatchReport {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let counters = Arc::new(Counters::default());
        let mut tasks = JoinSet::new();

        tracing::info!(
            topic = subscription.topic(),
            reply_topic = %self.reply_topic,
            max_in_flight = self.max_in_flight,
            reply_format = %self.reply_format,
            "Dispatch loop started"
        );

        loop {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let envelope = match subscription.read(&cancel).await {
                Ok(envelope) => envelope,
                Err(e) if e.is_terminal() => {
                    tracing::debug!(topic = subscription.topic(), reason = %e, "Dispatch loop stopping");
                    break;
                },
                Err(e) => {
                    counters.read_errors.fetch_add(1, Ordering::SeqCst);
                    DispatchMetrics::record_read_error();
                    tracing::warn!(topic = subscription.topic(), error = %e, "Failed to read request");
                    continue;
                },
            };

            counters.received.fetch_add(1, Ordering::SeqCst);
            DispatchMetrics::record_received();
            tracing::trace!(key = %envelope.key, topic = %envelope.topic, "Request received");

            // Reap finished tasks so the set only holds running handlers.
            while tasks.try_join_next().is_some() {}

            let job = ReplyJob {
                transport: Arc::clone(&self.transport),
                reply_topic: self.reply_topic.clone(),
                handler: Arc::clone(&self.handler),
                reply_format: self.reply_format,
                counters: Arc::clone(&counters),
            };
            tasks.spawn(async move {
                job.process(envelope).await;
                drop(permit);
            });
        }

        self.finish(&mut tasks, &counters).await;

        let report = counters.snapshot();
        tracing::info!(
            topic = subscription.topic(),
            received = report.received,
            replied = report.replied,
            handler_failures = report.handler_failures,
            reply_failures = report.reply_failures,
            aborted = report.aborted,
            "Dispatch loop stopped"
        );
        report
    }

    async fn finish(&self, tasks: &mut JoinSet<()>, counters: &Counters) {
        match self.shutdown {
            ShutdownMode::Detach => {
                let detached = tasks.len();
                if detached > 0 {
                    tracing::warn!(detached, "Leaving in-flight handlers running unawaited");
                }
                tasks.detach_all();
            },
            ShutdownMode::Drain(timeout) => {
                let in_flight = tasks.len();
                if in_flight > 0 {
                    tracing::info!(in_flight, timeout = ?timeout, "Draining in-flight handlers");
                }
                let drained = tokio::time::timeout(timeout, async {
                    while tasks.join_next().await.is_some() {}
                })
                .await;

                if drained.is_err() {
                    let aborted = tasks.len();
                    tracing::warn!(aborted, "Drain timed out, aborting remaining handlers");
                    counters
                        .aborted
                        .fetch_add(u64::try_from(aborted).unwrap_or(u64::MAX), Ordering::SeqCst);
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                }
            },
        }
    }
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("reply_topic", &self.reply_topic)
            .field("max_in_flight", &self.max_in_flight)
            .field("reply_format", &self.reply_format)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

/// Counts one running handler task for as long as it lives.
struct InFlightGuard(Arc<Counters>);

impl InFlightGuard {
    fn enter(counters: Arc<Counters>) -> Self {
        let in_flight = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        DispatchMetrics::set_in_flight(in_flight);
        Self(counters)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let in_flight = self.0.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        DispatchMetrics::set_in_flight(in_flight);
    }
}

/// Everything one handler task needs, moved into the task.
struct ReplyJob {
    transport: Arc<dyn Transport>,
    reply_topic: String,
    handler: Arc<dyn Handler>,
    reply_format: ReplyFormat,
    counters: Arc<Counters>,
}

impl ReplyJob {
    async fn process(self, envelope: Envelope) {
        // Dropped on return and on abort alike.
        let _in_flight = InFlightGuard::enter(Arc::clone(&self.counters));

        let key = envelope.key.clone();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.handler.handle(envelope))
            .catch_unwind()
            .await;

        let reply = match outcome {
            Ok(Ok(payload)) => {
                DispatchMetrics::record_handled("success", started.elapsed());
                Reply::Success(payload)
            },
            Ok(Err(err)) => {
                self.counters.handler_failures.fetch_add(1, Ordering::SeqCst);
                DispatchMetrics::record_handled(err.kind().as_str(), started.elapsed());
                tracing::debug!(key = %key, kind = %err.kind(), error = %err, "Handler failed");
                Reply::Failure(err.to_string())
            },
            Err(_) => {
                let err = HandlerError::internal("handler panicked");
                self.counters.handler_failures.fetch_add(1, Ordering::SeqCst);
                DispatchMetrics::record_handled(err.kind().as_str(), started.elapsed());
                tracing::error!(key = %key, "Handler panicked");
                Reply::Failure(err.to_string())
            },
        };

        self.publish_reply(&key, &reply).await;
    }

    async fn publish_reply(&self, key: &reply_bridge_core::CorrelationKey, reply: &Reply) {
        let payload = match self.reply_format.encode(reply) {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.reply_failures.fetch_add(1, Ordering::SeqCst);
                DispatchMetrics::record_reply_failure();
                tracing::error!(key = %key, error = %e, "Failed to encode reply");
                return;
            },
        };

        match self.transport.publish(&self.reply_topic, key, &payload).await {
            Ok(()) => {
                self.counters.replied.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    key = %key,
                    topic = %self.reply_topic,
                    success = reply.is_success(),
                    "Reply published"
                );
            },
            Err(e) => {
                self.counters.reply_failures.fetch_add(1, Ordering::SeqCst);
                DispatchMetrics::record_reply_failure();
                tracing::error!(
                    key = %key,
                    topic = %self.reply_topic,
                    error = %e,
                    "Failed to publish reply"
                );
            },
        }
    }
}
