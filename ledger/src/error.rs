//! Ledger error types.

use reply_bridge_core::{HandlerError, HandlerErrorKind};
use thiserror::Error;

/// Errors returned by ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// The amount is below zero
    #[error("amount must be not negative")]
    NegativeAmount,

    /// The amount is NaN or infinite
    #[error("amount must be a finite number, got {0}")]
    InvalidAmount(f64),

    /// The withdrawal exceeds the balance
    #[error("not enough balance for withdraw")]
    InsufficientFunds,

    /// The user has no account
    #[error("account not found for user {user_id}")]
    AccountNotFound {
        /// User that was looked up
        user_id: i64,
    },

    /// The user already has an account
    #[error("account with user_id {user_id} already exists")]
    AccountExists {
        /// User that already owns an account
        user_id: i64,
    },
}

impl LedgerError {
    /// Classification reported to the calling service.
    #[must_use]
    pub const fn kind(&self) -> HandlerErrorKind {
        match self {
            Self::NegativeAmount | Self::InvalidAmount(_) | Self::AccountExists { .. } => {
                HandlerErrorKind::Validation
            },
            Self::InsufficientFunds => HandlerErrorKind::InsufficientFunds,
            Self::AccountNotFound { .. } => HandlerErrorKind::NotFound,
        }
    }
}

impl From<LedgerError> for HandlerError {
    fn from(err: LedgerError) -> Self {
        Self::new(err.kind(), format!("Error processing transaction: {err}"))
    }
}
