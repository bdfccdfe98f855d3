//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: balance rows and identifier aliases
//! - `reservation`: reservation rows, keys and engine request types
//! - `ledger`: audit log, report entries and history ordering
//! - `operation`: validated replay operations
//! - `error`: error types for the ledger

pub mod account;
pub mod error;
pub mod ledger;
pub mod operation;
pub mod reservation;

pub use account::{Account, Amount, BalanceSnapshot, OrderId, ReserveAccount, ServiceId, UserId};
pub use error::BalanceError;
pub use ledger::{Direction, HistoryQuery, LogEntry, ReportEntry, SortField};
pub use operation::{Operation, OperationType, SettlementRequest};
pub use reservation::{
    Deposit, Reservation, ReservationId, ReservationKey, ReserveDetail, Settlement, Transfer,
};
