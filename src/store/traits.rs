//! Persistence traits consumed by the balance engine
//!
//! The engine only sees these two traits. A backend must provide
//! transaction-scoped row-locked reads and parameterized writes; how it does
//! so (in-memory row mutexes, `SELECT ... FOR UPDATE`) is its own business.

use crate::types::{
    Account, Amount, BalanceError, BalanceSnapshot, Direction, LogEntry, ReportEntry,
    ReservationId, ReservationKey, ReserveAccount, ServiceId, SortField, UserId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Reservation row to insert; the store assigns the id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReserveDetail {
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub order_id: crate::types::OrderId,
    pub amount: Amount,
    pub date: NaiveDate,
}

/// Non-transactional reads and the transaction factory
#[async_trait]
pub trait Store: Send + Sync {
    /// Transaction handle produced by [`Store::begin`]
    type Tx: StoreTx;

    /// Open a transaction
    async fn begin(&self) -> Result<Self::Tx, BalanceError>;

    /// Read an account without locking it
    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, BalanceError>;

    /// Read a reserve account without locking it
    async fn get_reserve_account(
        &self,
        user_id: UserId,
    ) -> Result<Option<ReserveAccount>, BalanceError>;

    /// Resolve a catalog service to its title
    async fn service_title(&self, service_id: ServiceId) -> Result<Option<String>, BalanceError>;

    /// Add or rename a catalog service
    async fn register_service(&self, service_id: ServiceId, title: &str)
        -> Result<(), BalanceError>;

    /// Audit entries of a user, ordered by `sort_field`/`direction`
    ///
    /// Ties keep insertion order.
    async fn history(
        &self,
        user_id: UserId,
        sort_field: SortField,
        direction: Direction,
    ) -> Result<Vec<LogEntry>, BalanceError>;

    /// Sum of report amounts per service title for `from..=to`
    async fn report_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<String, Amount>, BalanceError>;

    /// Every account with its reserve balance, ordered by user id
    async fn accounts(&self) -> Result<Vec<BalanceSnapshot>, BalanceError>;
}

/// Operations scoped to one open transaction
///
/// Row locks taken by the `*_for_update` reads are held until
/// [`StoreTx::commit`] or [`StoreTx::rollback`]. Dropping a transaction
/// without committing discards its writes.
#[async_trait]
pub trait StoreTx: Send + Sized {
    /// Lock the account row of `user_id` and read it
    ///
    /// The lock is taken even when the row does not exist yet, so concurrent
    /// first deposits for the same user serialize.
    async fn account_for_update(&mut self, user_id: UserId)
        -> Result<Option<Account>, BalanceError>;

    async fn insert_account(&mut self, user_id: UserId, balance: Amount)
        -> Result<(), BalanceError>;

    async fn update_account_balance(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError>;

    /// Create the reserve row of a user with a zero balance
    async fn insert_reserve_account(&mut self, user_id: UserId) -> Result<(), BalanceError>;

    /// Lock the reserve row of `user_id` and read its balance
    async fn reserve_balance_for_update(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Amount>, BalanceError>;

    async fn update_reserve_balance(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError>;

    async fn insert_reserve_detail(
        &mut self,
        detail: NewReserveDetail,
    ) -> Result<ReservationId, BalanceError>;

    /// Delete the reservation designated by `key`; returns rows affected
    async fn delete_reserve_detail(&mut self, key: ReservationKey) -> Result<u64, BalanceError>;

    async fn insert_log_entry(&mut self, entry: LogEntry) -> Result<(), BalanceError>;

    async fn insert_report_entry(&mut self, entry: ReportEntry) -> Result<(), BalanceError>;

    async fn commit(self) -> Result<(), BalanceError>;

    async fn rollback(self) -> Result<(), BalanceError>;
}
