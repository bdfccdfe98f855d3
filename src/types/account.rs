//! Account-related types for the user balance ledger
//!
//! A user owns two balance rows: the spendable [`Account`] and the
//! [`ReserveAccount`] holding funds set aside for open reservations.

use serde::{Deserialize, Serialize};

/// User identifier
pub type UserId = i64;

/// Catalog service identifier
pub type ServiceId = i64;

/// External order identifier
pub type OrderId = i64;

/// Monetary amount in minor currency units
pub type Amount = i64;

/// Spendable balance of a user
///
/// `balance >= 0` holds after every committed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user owning the account
    pub id: UserId,

    /// Available funds
    pub balance: Amount,
}

impl Account {
    /// Create an account with the given opening balance
    pub fn new(id: UserId, balance: Amount) -> Self {
        Account { id, balance }
    }
}

/// Funds currently held for a user across all open reservations
///
/// Always equal to the sum of the user's open reservation amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveAccount {
    pub user_id: UserId,
    pub balance: Amount,
}

/// Snapshot of both balances of a user, used for replay output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub user_id: UserId,
    pub balance: Amount,
    pub reserved: Amount,
}
