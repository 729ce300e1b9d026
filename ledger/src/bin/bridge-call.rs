//! bridge-call - send one request over the reply bridge and print the reply.
//!
//! Like `curl` for a request/reply topic pair.
//!
//! ```bash
//! bridge-call --brokers localhost:9092 \
//!     '{"id":7,"user_id":1,"is_deposit":true,"amount":10,"date":"2025-01-01T00:00:00Z"}'
//! ```

use anyhow::Context;
use clap::Parser;
use reply_bridge_core::{CancellationToken, CorrelationKey, Reply, ReplyFormat, Transport};
use reply_bridge_redpanda::RedpandaTransport;
use reply_bridge_runtime::{BridgeClient, Correlator};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Send one request over the reply bridge
#[derive(Parser, Debug)]
#[command(name = "bridge-call")]
#[command(version)]
#[command(about = "Publish a request and wait for its correlated reply")]
struct Args {
    /// Request payload (sent as-is)
    payload: String,

    /// Kafka/Redpanda brokers, `;` or `,` separated
    #[arg(short, long, env = "KAFKA_URL", default_value = "localhost:9092")]
    brokers: String,

    /// Topic the request is published to
    #[arg(long, env = "KAFKA_REQUEST_TOPIC", default_value = "payments.requests")]
    request_topic: String,

    /// Topic the reply is read from
    #[arg(long, env = "KAFKA_RESPONSE_TOPIC", default_value = "payments.replies")]
    reply_topic: String,

    /// Consumer group for the reply topic (default: `bridge-call-<uuid>`)
    ///
    /// Sharing a group between concurrent invocations splits the reply
    /// partitions between them, so each may miss its own reply.
    #[arg(short, long)]
    group: Option<String>,

    /// Correlation key (default: a fresh UUID)
    #[arg(short, long)]
    key: Option<String>,

    /// Seconds to wait for the reply
    #[arg(short, long, default_value = "60")]
    timeout: u64,

    /// Reply wire format: tagged, legacy
    #[arg(short, long, default_value = "tagged")]
    format: ReplyFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    let brokers = args.brokers.replace(';', ",");
    let transport: Arc<dyn Transport> = Arc::new(
        RedpandaTransport::builder()
            .brokers(brokers)
            .consumer_group(reply_group(args.group))
            .build()
            .context("failed to create Kafka transport")?,
    );

    let correlator = Correlator::new(Arc::clone(&transport), args.request_topic)
        .with_reply_format(args.format)
        .with_default_timeout(Duration::from_secs(args.timeout));
    let client = BridgeClient::connect(transport, &args.reply_topic, correlator)
        .await
        .context("failed to subscribe to reply topic")?;

    let key = args.key.map_or_else(CorrelationKey::generate, CorrelationKey::from);
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = client.call(&cancel, key.clone(), args.payload.as_bytes(), None).await;
    client.shutdown().await;

    match result.with_context(|| format!("request {key} failed"))? {
        Reply::Success(payload) => {
            println!("{}", String::from_utf8_lossy(&payload));
            Ok(ExitCode::SUCCESS)
        },
        Reply::Failure(message) => {
            eprintln!("{message}");
            Ok(ExitCode::FAILURE)
        },
    }
}

fn reply_group(group: Option<String>) -> String {
    group.unwrap_or_else(|| format!("bridge-call-{}", Uuid::new_v4()))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_invocation_gets_its_own_reply_group() {
        let first = reply_group(None);
        let second = reply_group(None);

        assert!(first.starts_with("bridge-call-"));
        assert_ne!(first, second);
    }

    #[test]
    fn explicit_reply_group_is_kept() {
        assert_eq!(reply_group(Some("ops".to_string())), "ops");
    }
}
