//! # Reply Bridge Ledger
//!
//! A payment ledger served over the reply bridge: the handling side of the
//! request/reply exchange.
//!
//! - **[`Transaction`]**: the JSON request (deposit or withdrawal)
//! - **[`InMemoryLedger`]**: accounts by user id; applies each transaction id at most once
//! - **[`PaymentHandler`]**: decodes requests, applies them and classifies failures
//!
//! Two binaries ship with the crate:
//!
//! - `payment-service` runs the dispatch loop against a Kafka/Redpanda cluster
//! - `bridge-call` sends one request and prints the reply
//!
//! ## Example
//!
//! ```ignore
//! use reply_bridge_ledger::{InMemoryLedger, PaymentHandler};
//!
//! let ledger = Arc::new(InMemoryLedger::new());
//! ledger.open_account(1)?;
//!
//! let handler = Arc::new(PaymentHandler::new(ledger));
//! let dispatch = config.dispatch_loop(transport, handler);
//! dispatch.run(requests, shutdown).await;
//! ```

pub mod domain;
pub mod error;
pub mod handler;
pub mod ledger;

pub use domain::{Account, Transaction};
pub use error::LedgerError;
pub use handler::PaymentHandler;
pub use ledger::{ApplyOutcome, InMemoryLedger};
