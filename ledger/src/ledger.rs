//! In-memory account ledger.
//!
//! Transactions are applied at most once per id: redelivering a transaction
//! that was already applied is a successful no-op, which makes the payment
//! handler safe under at-least-once delivery.

use crate::domain::{Account, Transaction};
use crate::error::LedgerError;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of applying a transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplyOutcome {
    /// The balance changed; carries the new balance
    Applied {
        /// Balance after the transaction
        balance: f64,
    },
    /// A transaction with this id was applied before; nothing changed
    AlreadyApplied,
}

#[derive(Debug, Default)]
struct Books {
    accounts: HashMap<i64, Account>,
    applied: HashSet<i64>,
    next_account_id: u64,
}

/// Accounts keyed by user id, plus the set of applied transaction ids.
///
/// All operations take one lock, so checking the applied set, moving the
/// balance and recording the id happen atomically.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    books: Mutex<Books>,
}

impl InMemoryLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a zero-balance account for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountExists`] if the user already has one.
    pub fn open_account(&self, user_id: i64) -> Result<Account, LedgerError> {
        self.open_account_with_balance(user_id, 0.0)
    }

    /// Open an account for `user_id` holding `balance` from the start.
    ///
    /// The opening balance is not a transaction: no id is consumed, so it
    /// cannot collide with ids sent by clients.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountExists`] if the user already has an account
    /// - [`LedgerError::NegativeAmount`] / [`LedgerError::InvalidAmount`] for a bad balance
    pub fn open_account_with_balance(&self, user_id: i64, balance: f64) -> Result<Account, LedgerError> {
        let mut books = self.books();
        if books.accounts.contains_key(&user_id) {
            return Err(LedgerError::AccountExists { user_id });
        }

        let mut account = Account::new(books.next_account_id + 1, user_id, Utc::now());
        account.deposit(balance)?;
        books.next_account_id = account.id;
        books.accounts.insert(user_id, account.clone());

        tracing::info!(user_id, account_id = account.id, balance, "Account opened");
        Ok(account)
    }

    /// Snapshot of `user_id`'s account.
    #[must_use]
    pub fn account(&self, user_id: i64) -> Option<Account> {
        self.books().accounts.get(&user_id).cloned()
    }

    /// Current balance of `user_id`'s account.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] if the user has no account.
    pub fn balance(&self, user_id: i64) -> Result<f64, LedgerError> {
        self.books()
            .accounts
            .get(&user_id)
            .map(|account| account.balance)
            .ok_or(LedgerError::AccountNotFound { user_id })
    }

    /// Whether a transaction with `id` has been applied.
    #[must_use]
    pub fn is_applied(&self, id: i64) -> bool {
        self.books().applied.contains(&id)
    }

    /// Apply a deposit or withdrawal.
    ///
    /// A failed transaction is not recorded, so it may be retried later under
    /// the same id.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AccountNotFound`] if the user has no account
    /// - [`LedgerError::InsufficientFunds`] if a withdrawal exceeds the balance
    /// - [`LedgerError::NegativeAmount`] / [`LedgerError::InvalidAmount`] for bad amounts
    pub fn apply(&self, transaction: &Transaction) -> Result<ApplyOutcome, LedgerError> {
        let mut books = self.books();
        if books.applied.contains(&transaction.id) {
            tracing::debug!(transaction_id = transaction.id, "Transaction already applied");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let account = books
            .accounts
            .get_mut(&transaction.user_id)
            .ok_or(LedgerError::AccountNotFound {
                user_id: transaction.user_id,
            })?;

        if transaction.is_deposit {
            account.deposit(transaction.amount)?;
        } else {
            account.withdraw(transaction.amount)?;
        }
        let balance = account.balance;
        books.applied.insert(transaction.id);

        tracing::debug!(
            transaction_id = transaction.id,
            user_id = transaction.user_id,
            is_deposit = transaction.is_deposit,
            amount = transaction.amount,
            balance,
            "Transaction applied"
        );
        Ok(ApplyOutcome::Applied { balance })
    }

    fn books(&self) -> MutexGuard<'_, Books> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
