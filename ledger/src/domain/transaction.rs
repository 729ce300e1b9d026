use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deposit to, or withdrawal from, a user's account.
///
/// On the wire this is JSON:
///
/// ```json
/// {"id": 7, "user_id": 1, "is_deposit": true, "amount": 10.5, "date": "2025-01-01T00:00:00Z"}
/// ```
///
/// `id` is the idempotency identifier: a ledger applies each id at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    pub id: i64,
    /// Owner of the account the transaction applies to
    pub user_id: i64,
    /// `true` for a deposit, `false` for a withdrawal
    pub is_deposit: bool,
    /// Amount moved, never negative
    pub amount: f64,
    /// When the transaction was issued
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// A deposit of `amount` into `user_id`'s account.
    #[must_use]
    pub const fn deposit(id: i64, user_id: i64, amount: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            is_deposit: true,
            amount,
            timestamp,
        }
    }

    /// A withdrawal of `amount` from `user_id`'s account.
    #[must_use]
    pub const fn withdrawal(id: i64, user_id: i64, amount: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            is_deposit: false,
            amount,
            timestamp,
        }
    }
}
