use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's account and its current balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: u64,
    /// Owner of the account
    pub user_id: i64,
    /// Current balance, never negative
    pub balance: f64,
    /// When the account was opened
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A new account with a zero balance.
    #[must_use]
    pub const fn new(id: u64, user_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            balance: 0.0,
            created_at,
        }
    }

    /// Add `amount` to the balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NegativeAmount`] or [`LedgerError::InvalidAmount`]
    /// if `amount` is not a finite, non-negative number.
    pub fn deposit(&mut self, amount: f64) -> Result<(), LedgerError> {
        check_amount(amount)?;
        self.balance += amount;
        Ok(())
    }

    /// Take `amount` from the balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientFunds`] if the balance would go
    /// negative, and the same amount errors as [`deposit`](Self::deposit).
    pub fn withdraw(&mut self, amount: f64) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if self.balance - amount < 0.0 {
            return Err(LedgerError::InsufficientFunds);
        }
        self.balance -= amount;
        Ok(())
    }
}

fn check_amount(amount: f64) -> Result<(), LedgerError> {
    if !amount.is_finite() {
        return Err(LedgerError::InvalidAmount(amount));
    }
    if amount < 0.0 {
        return Err(LedgerError::NegativeAmount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn account(balance: f64) -> Account {
        Account {
            balance,
            ..Account::new(1, 1, Utc::now())
        }
    }

    #[test]
    fn deposit_increases_balance() {
        let mut acc = account(10.0);
        assert_eq!(acc.deposit(5.0), Ok(()));
        assert!((acc.balance - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let mut acc = account(10.0);
        assert_eq!(acc.deposit(-1.0), Err(LedgerError::NegativeAmount));
        assert_eq!(acc.withdraw(-1.0), Err(LedgerError::NegativeAmount));
        assert!((acc.balance - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn non_finite_amounts_are_rejected() {
        let mut acc = account(10.0);
        assert!(matches!(acc.deposit(f64::NAN), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(acc.withdraw(f64::INFINITY), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn overdraft_is_rejected() {
        let mut acc = account(10.0);
        assert_eq!(acc.withdraw(10.5), Err(LedgerError::InsufficientFunds));
        assert_eq!(acc.withdraw(10.0), Ok(()));
        assert!(acc.balance.abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn balance_never_goes_negative(
            start in 0.0f64..1_000.0,
            ops in prop::collection::vec((any::<bool>(), 0.0f64..500.0), 0..50),
        ) {
            let mut acc = account(start);
            for (is_deposit, amount) in ops {
                let _ = if is_deposit { acc.deposit(amount) } else { acc.withdraw(amount) };
                prop_assert!(acc.balance >= 0.0);
            }
        }
    }
}
