//! User Balance Ledger Library
//! # Overview
//!
//! This library keeps per-user money balances with a two-phase reservation
//! flow for purchases of catalog services, an append-only audit log and
//! monthly per-service reports.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Account, Reservation, LogEntry, etc.)
//! - [`store`] - Persistence traits with in-memory and PostgreSQL backends
//! - [`core`] - Business logic components:
//!   - [`core::engine`] - Balance mutations under row locks
//!   - [`core::history`] - History listing and report aggregation
//! - [`io`] - CSV operation reader, balance/report writers
//! - [`replay`] - Pipeline applying a CSV of operations to the engine
//! - [`cli`], [`config`], [`logging`] - Command-line surface
//!
//! # Operations
//!
//! - **Replenish**: Credit a balance, opening the account on first use
//! - **Transfer**: Move funds between two existing accounts
//! - **Reserve**: Move funds from the balance to the reserve for an order
//! - **Confirm**: Consume a reservation and record it for reporting
//! - **Cancel**: Return a reservation to the balance
//!
//! # Account States
//!
//! Each user has:
//! - `balance`: Funds available for transfers and new reservations
//! - `reserve`: Funds held by open reservations, equal to their sum

pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod logging;
pub mod replay;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use core::{BalanceEngine, Report, ReportPeriod};
pub use io::write_balances_csv;
pub use store::{MemoryStore, Store, StoreTx};
pub use types::{
    Account, BalanceError, Deposit, Direction, HistoryQuery, LogEntry, Operation, Reservation,
    ReservationId, ReserveAccount, Settlement, SortField, Transfer,
};
