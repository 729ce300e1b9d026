//! Payment domain types.

mod account;
mod transaction;

pub use account::Account;
pub use transaction::Transaction;
