//! Payment service: serves ledger transactions arriving on the request topic.
//!
//! Bridge settings come from the environment (`KAFKA_URL`,
//! `KAFKA_REQUEST_TOPIC`, `KAFKA_RESPONSE_TOPIC`, `KAFKA_GROUP_ID`, ...);
//! accounts to open at startup come from the command line.
//!
//! Run with: `cargo run --bin payment-service -- --account 1:100 --account 2`

use anyhow::Context;
use clap::Parser;
use reply_bridge_core::{CancellationToken, Transport};
use reply_bridge_ledger::{InMemoryLedger, PaymentHandler};
use reply_bridge_redpanda::RedpandaTransport;
use reply_bridge_runtime::BridgeConfig;
use reply_bridge_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serve payment transactions over Kafka/Redpanda
#[derive(Parser, Debug)]
#[command(name = "payment-service")]
#[command(version)]
#[command(about = "Apply deposits and withdrawals received over the reply bridge")]
struct Args {
    /// Account to open at startup, as USER_ID or USER_ID:INITIAL_BALANCE
    #[arg(long = "account", env = "PAYMENT_ACCOUNTS", value_delimiter = ',', value_parser = parse_account)]
    accounts: Vec<(i64, f64)>,
}

fn parse_account(raw: &str) -> Result<(i64, f64), String> {
    let (user, balance) = raw.split_once(':').unwrap_or((raw, "0"));
    let user_id = user
        .trim()
        .parse()
        .map_err(|e| format!("invalid user id {user:?}: {e}"))?;
    let balance: f64 = balance
        .trim()
        .parse()
        .map_err(|e| format!("invalid balance {balance:?}: {e}"))?;
    if !balance.is_finite() || balance < 0.0 {
        return Err(format!("initial balance must be a non-negative number, got {balance}"));
    }
    Ok((user_id, balance))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = BridgeConfig::from_env()?;

    if let Some(addr) = config.metrics_addr {
        MetricsServer::new(addr)
            .serve()
            .context("failed to start metrics server")?;
    }

    let ledger = Arc::new(InMemoryLedger::new());
    for (user_id, balance) in args.accounts {
        ledger.open_account_with_balance(user_id, balance)?;
    }

    let transport: Arc<dyn Transport> = Arc::new(
        RedpandaTransport::builder()
            .brokers(config.bootstrap_servers())
            .consumer_group(config.group_id.clone())
            .build()
            .context("failed to create Kafka transport")?,
    );
    let requests = transport
        .subscribe(&config.request_topic)
        .await
        .with_context(|| format!("failed to subscribe to {}", config.request_topic))?;

    let handler = Arc::new(PaymentHandler::new(Arc::clone(&ledger)));
    let dispatch = config.dispatch_loop(Arc::clone(&transport), handler);

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        token.cancel();
    });

    info!(
        request_topic = %config.request_topic,
        response_topic = %config.response_topic,
        group_id = %config.group_id,
        "Payment service started"
    );
    let report = dispatch.run(requests, shutdown).await;

    info!(
        received = report.received,
        replied = report.replied,
        handler_failures = report.handler_failures,
        reply_failures = report.reply_failures,
        aborted = report.aborted,
        "Payment service stopped"
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
