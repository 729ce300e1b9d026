//! Payment request handler served by the dispatch loop.

use crate::domain::Transaction;
use crate::ledger::{ApplyOutcome, InMemoryLedger};
use reply_bridge_core::{Envelope, HandlerError, LEGACY_SUCCESS_MARKER};
use reply_bridge_runtime::{Handler, HandlerFuture};
use std::sync::Arc;

/// Decodes a JSON [`Transaction`] and applies it to the ledger.
///
/// | Outcome | Reply |
/// |---|---|
/// | applied, or already applied | success `OK` |
/// | malformed JSON | validation: `invalid JSON: ...` |
/// | unknown user | not found |
/// | overdraft | insufficient funds |
/// | bad amount | validation |
#[derive(Debug, Clone)]
pub struct PaymentHandler {
    ledger: Arc<InMemoryLedger>,
}

impl PaymentHandler {
    /// Serve payments against `ledger`.
    #[must_use]
    pub const fn new(ledger: Arc<InMemoryLedger>) -> Self {
        Self { ledger }
    }

    /// Handle one raw request payload.
    ///
    /// # Errors
    ///
    /// Returns a classified [`HandlerError`] when the payload is not a valid
    /// transaction or the ledger rejects it.
    pub fn process(&self, payload: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let transaction: Transaction = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::validation(format!("invalid JSON: {e}")))?;

        match self.ledger.apply(&transaction)? {
            ApplyOutcome::Applied { balance } => {
                tracing::info!(
                    transaction_id = transaction.id,
                    user_id = transaction.user_id,
                    balance,
                    "Payment processed"
                );
            },
            ApplyOutcome::AlreadyApplied => {
                tracing::info!(transaction_id = transaction.id, "Duplicate payment acknowledged");
            },
        }
        Ok(LEGACY_SUCCESS_MARKER.to_vec())
    }
}

impl Handler for PaymentHandler {
    fn handle(&self, envelope: Envelope) -> HandlerFuture<'_> {
        Box::pin(async move {
            let result = self.process(&envelope.payload);
            if let Err(e) = &result {
                tracing::warn!(key = %envelope.key, kind = %e.kind(), error = %e, "Payment rejected");
            }
            result
        })
    }
}
