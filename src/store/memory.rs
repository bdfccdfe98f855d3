//! In-memory store with row-level locking
//!
//! `MemoryStore` keeps every table in a `DashMap` and emulates the row locks
//! of a relational store with one `tokio::sync::Mutex` per row key.
//!
//! # Design
//!
//! - A `*_for_update` read acquires the owned mutex of the row key and keeps
//!   the guard inside the transaction until commit or rollback.
//! - Writes are staged in the transaction and applied at commit. Dropping or
//!   rolling back a transaction throws the staged writes away.
//! - Commits apply behind a write-locked commit gate; plain reads take the
//!   gate in read mode, so a half-applied commit is never observed.
//! - An optional lock timeout turns a stuck lock wait into a `Storage` error,
//!   like a database lock-wait timeout.

use crate::store::traits::{NewReserveDetail, Store, StoreTx};
use crate::types::{
    Account, Amount, BalanceError, BalanceSnapshot, Direction, LogEntry, ReportEntry,
    ReservationId, ReservationKey, ReserveAccount, ReserveDetail, ServiceId, SortField, UserId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Lockable row of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Account(UserId),
    Reserve(UserId),
}

/// Committed table contents
#[derive(Debug)]
struct Tables {
    accounts: DashMap<UserId, Amount>,
    reserves: DashMap<UserId, Amount>,
    details: DashMap<ReservationId, ReserveDetail>,
    logs: DashMap<UserId, Vec<LogEntry>>,
    reports: DashMap<u64, ReportEntry>,
    services: DashMap<ServiceId, String>,
}

#[derive(Debug)]
struct Shared {
    tables: Tables,
    row_locks: DashMap<RowKey, Arc<Mutex<()>>>,
    commit_gate: RwLock<()>,
    next_reservation: AtomicI64,
    next_report: AtomicU64,
    lock_timeout: Option<Duration>,
}

/// Thread-safe in-memory implementation of [`Store`]
///
/// Cloning is cheap and every clone shares the same tables and locks.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store with no lock timeout
    pub fn new() -> Self {
        Self::with_lock_timeout(None)
    }

    /// Create an empty store whose row-lock waits fail after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Option<Duration>) -> Self {
        MemoryStore {
            shared: Arc::new(Shared {
                tables: Tables {
                    accounts: DashMap::new(),
                    reserves: DashMap::new(),
                    details: DashMap::new(),
                    logs: DashMap::new(),
                    reports: DashMap::new(),
                    services: DashMap::new(),
                },
                row_locks: DashMap::new(),
                commit_gate: RwLock::new(()),
                next_reservation: AtomicI64::new(1),
                next_report: AtomicU64::new(1),
                lock_timeout,
            }),
        }
    }

    /// Register a catalog service
    pub fn add_service(&self, service_id: ServiceId, title: impl Into<String>) {
        self.shared.tables.services.insert(service_id, title.into());
    }

    /// Register several catalog services at once
    pub fn with_services<I, T>(self, services: I) -> Self
    where
        I: IntoIterator<Item = (ServiceId, T)>,
        T: Into<String>,
    {
        for (id, title) in services {
            self.add_service(id, title);
        }
        self
    }

    /// Number of open reservations, across all users
    pub fn open_reservations(&self) -> usize {
        self.shared.tables.details.len()
    }

    /// Confirmed report entries, in insertion order
    pub fn report_entries(&self) -> Vec<ReportEntry> {
        let mut entries: Vec<(u64, ReportEntry)> = self
            .shared
            .tables
            .reports
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, BalanceError> {
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            guards: HashMap::new(),
            accounts: HashMap::new(),
            reserves: HashMap::new(),
            inserted: Vec::new(),
            deleted: Vec::new(),
            logs: Vec::new(),
            reports: Vec::new(),
        })
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, BalanceError> {
        let _gate = self.shared.commit_gate.read().await;
        Ok(self
            .shared
            .tables
            .accounts
            .get(&user_id)
            .map(|balance| Account::new(user_id, *balance)))
    }

    async fn get_reserve_account(
        &self,
        user_id: UserId,
    ) -> Result<Option<ReserveAccount>, BalanceError> {
        let _gate = self.shared.commit_gate.read().await;
        Ok(self
            .shared
            .tables
            .reserves
            .get(&user_id)
            .map(|balance| ReserveAccount {
                user_id,
                balance: *balance,
            }))
    }

    async fn service_title(&self, service_id: ServiceId) -> Result<Option<String>, BalanceError> {
        Ok(self
            .shared
            .tables
            .services
            .get(&service_id)
            .map(|title| title.value().clone()))
    }

    async fn register_service(
        &self,
        service_id: ServiceId,
        title: &str,
    ) -> Result<(), BalanceError> {
        self.add_service(service_id, title);
        Ok(())
    }

    async fn history(
        &self,
        user_id: UserId,
        sort_field: SortField,
        direction: Direction,
    ) -> Result<Vec<LogEntry>, BalanceError> {
        let mut entries = {
            let _gate = self.shared.commit_gate.read().await;
            self.shared
                .tables
                .logs
                .get(&user_id)
                .map(|logs| logs.value().clone())
                .unwrap_or_default()
        };

        // Stable sort: equal keys keep insertion order in both directions
        entries.sort_by(|a, b| {
            let ordering = match sort_field {
                SortField::Date => a.date.cmp(&b.date),
                SortField::Amount => a.amount.cmp(&b.amount),
            };
            match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        });

        Ok(entries)
    }

    async fn report_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<String, Amount>, BalanceError> {
        let _gate = self.shared.commit_gate.read().await;
        let tables = &self.shared.tables;
        let mut totals = BTreeMap::new();

        for entry in tables.reports.iter() {
            let report = entry.value();
            if report.date < from || report.date > to {
                continue;
            }
            // Inner join on the catalog: entries of unknown services are skipped
            if let Some(title) = tables.services.get(&report.service_id) {
                let total: &mut Amount = totals.entry(title.value().clone()).or_insert(0);
                *total = total.checked_add(report.amount).ok_or_else(|| {
                    BalanceError::arithmetic_overflow("report total", report.user_id)
                })?;
            }
        }

        Ok(totals)
    }

    async fn accounts(&self) -> Result<Vec<BalanceSnapshot>, BalanceError> {
        let _gate = self.shared.commit_gate.read().await;
        let tables = &self.shared.tables;

        let mut snapshots: Vec<BalanceSnapshot> = tables
            .accounts
            .iter()
            .map(|entry| BalanceSnapshot {
                user_id: *entry.key(),
                balance: *entry.value(),
                reserved: tables
                    .reserves
                    .get(entry.key())
                    .map(|reserved| *reserved)
                    .unwrap_or(0),
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.user_id);

        Ok(snapshots)
    }
}

/// Open transaction on a [`MemoryStore`]
///
/// Holds the row guards it acquired and the writes it staged.
pub struct MemoryTx {
    shared: Arc<Shared>,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    accounts: HashMap<UserId, Amount>,
    reserves: HashMap<UserId, Amount>,
    inserted: Vec<ReserveDetail>,
    deleted: Vec<ReservationId>,
    logs: Vec<LogEntry>,
    reports: Vec<ReportEntry>,
}

impl MemoryTx {
    /// Acquire the row lock for `key` unless this transaction already holds it
    async fn lock(&mut self, key: RowKey) -> Result<(), BalanceError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }

        let mutex = Arc::clone(
            self.shared
                .row_locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let guard = match self.shared.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, mutex.lock_owned())
                .await
                .map_err(|_| BalanceError::storage(format!("lock wait timeout on {:?}", key)))?,
            None => mutex.lock_owned().await,
        };

        self.guards.insert(key, guard);
        Ok(())
    }

    fn current_account(&self, user_id: UserId) -> Option<Amount> {
        self.accounts.get(&user_id).copied().or_else(|| {
            self.shared
                .tables
                .accounts
                .get(&user_id)
                .map(|balance| *balance)
        })
    }

    fn current_reserve(&self, user_id: UserId) -> Option<Amount> {
        self.reserves.get(&user_id).copied().or_else(|| {
            self.shared
                .tables
                .reserves
                .get(&user_id)
                .map(|balance| *balance)
        })
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn account_for_update(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Account>, BalanceError> {
        self.lock(RowKey::Account(user_id)).await?;
        Ok(self
            .current_account(user_id)
            .map(|balance| Account::new(user_id, balance)))
    }

    async fn insert_account(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError> {
        if self.current_account(user_id).is_some() {
            return Err(BalanceError::storage(format!(
                "duplicate key: account {} already exists",
                user_id
            )));
        }
        self.accounts.insert(user_id, balance);
        Ok(())
    }

    async fn update_account_balance(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError> {
        self.accounts.insert(user_id, balance);
        Ok(())
    }

    async fn insert_reserve_account(&mut self, user_id: UserId) -> Result<(), BalanceError> {
        if self.current_reserve(user_id).is_some() {
            return Err(BalanceError::storage(format!(
                "duplicate key: reserve account {} already exists",
                user_id
            )));
        }
        self.reserves.insert(user_id, 0);
        Ok(())
    }

    async fn reserve_balance_for_update(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Amount>, BalanceError> {
        self.lock(RowKey::Reserve(user_id)).await?;
        Ok(self.current_reserve(user_id))
    }

    async fn update_reserve_balance(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError> {
        self.reserves.insert(user_id, balance);
        Ok(())
    }

    async fn insert_reserve_detail(
        &mut self,
        detail: NewReserveDetail,
    ) -> Result<ReservationId, BalanceError> {
        let id = ReservationId(self.shared.next_reservation.fetch_add(1, Ordering::Relaxed));
        self.inserted.push(ReserveDetail {
            id,
            user_id: detail.user_id,
            service_id: detail.service_id,
            order_id: detail.order_id,
            amount: detail.amount,
            date: detail.date,
        });
        Ok(id)
    }

    async fn delete_reserve_detail(&mut self, key: ReservationKey) -> Result<u64, BalanceError> {
        if let Some(pos) = self.inserted.iter().position(|detail| key.matches(detail)) {
            self.inserted.remove(pos);
            return Ok(1);
        }
        if self.deleted.contains(&key.id) {
            return Ok(0);
        }

        let matched = self
            .shared
            .tables
            .details
            .get(&key.id)
            .map(|detail| key.matches(&detail))
            .unwrap_or(false);

        if matched {
            self.deleted.push(key.id);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn insert_log_entry(&mut self, entry: LogEntry) -> Result<(), BalanceError> {
        self.logs.push(entry);
        Ok(())
    }

    async fn insert_report_entry(&mut self, entry: ReportEntry) -> Result<(), BalanceError> {
        self.reports.push(entry);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), BalanceError> {
        let shared = Arc::clone(&self.shared);
        let tables = &shared.tables;
        let _gate = shared.commit_gate.write().await;

        for (user_id, balance) in self.accounts.drain() {
            tables.accounts.insert(user_id, balance);
        }
        for (user_id, balance) in self.reserves.drain() {
            tables.reserves.insert(user_id, balance);
        }
        for id in self.deleted.drain(..) {
            tables.details.remove(&id);
        }
        for detail in self.inserted.drain(..) {
            tables.details.insert(detail.id, detail);
        }
        for entry in self.logs.drain(..) {
            tables.logs.entry(entry.user_id).or_default().push(entry);
        }
        for entry in self.reports.drain(..) {
            let seq = shared.next_report.fetch_add(1, Ordering::Relaxed);
            tables.reports.insert(seq, entry);
        }

        // Row guards are released when `self` drops, after the gate
        drop(_gate);
        Ok(())
    }

    async fn rollback(self) -> Result<(), BalanceError> {
        Ok(())
    }
}
