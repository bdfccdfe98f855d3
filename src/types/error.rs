//! Error types for the user balance ledger
//!
//! This module defines every error the balance engine, the stores and the
//! replay pipeline can return.
//!
//! # Error Categories
//!
//! - **Business Errors**: missing users or services, insufficient funds,
//!   unmatched reservations, empty history. Surfaced to the caller verbatim.
//! - **Integrity Errors**: arithmetic overflow/underflow on a balance column.
//! - **Infrastructure Errors**: storage, I/O and CSV failures. Opaque to the
//!   caller and never retried by the engine.

use super::account::{Amount, ServiceId, UserId};
use super::reservation::ReservationId;
use thiserror::Error;

/// Main error type for the balance ledger
///
/// Every failing engine operation rolls back its transaction before one of
/// these is returned, so an error never leaves a partial mutation behind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalanceError {
    /// No account row exists for the user
    #[error("User {user_id} not found")]
    UserNotFound {
        /// The user that was looked up
        user_id: UserId,
    },

    /// The service id is not in the catalog
    #[error("Service {service_id} not found")]
    ServiceNotFound {
        /// The service that was looked up
        service_id: ServiceId,
    },

    /// The debit would drive the balance below zero
    ///
    /// The transaction is rolled back and both balances are left unchanged.
    #[error("Insufficient funds for user {user_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// User whose balance was checked
        user_id: UserId,
        /// Balance at the time of the check (under row lock)
        available: Amount,
        /// Requested debit
        requested: Amount,
    },

    /// Confirmation or cancellation matched no open reservation
    #[error("No open reservation {reservation_id} for user {user_id}")]
    ReservationNotFound {
        /// Reservation key supplied by the caller
        reservation_id: ReservationId,
        /// Owner supplied by the caller
        user_id: UserId,
    },

    /// The user has no audit log entries
    #[error("No history for user {user_id}")]
    NoHistory {
        /// User whose history was requested
        user_id: UserId,
    },

    /// Amount must be strictly positive
    #[error("Invalid amount {amount}: must be greater than zero")]
    InvalidAmount {
        /// The rejected amount
        amount: Amount,
    },

    /// Transfer source and destination are the same user
    #[error("User {user_id} cannot transfer to itself")]
    SelfTransfer {
        /// The user on both sides of the transfer
        user_id: UserId,
    },

    /// Report period outside the accepted calendar range
    #[error("Invalid report period {month}/{year}")]
    InvalidPeriod {
        /// Requested month (1-12)
        month: u32,
        /// Requested year (>= 1970)
        year: i32,
    },

    /// Balance arithmetic left the representable range
    #[error("Arithmetic overflow in {operation} for user {user_id}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
        /// User whose balance was being changed
        user_id: UserId,
    },

    /// The backing store failed (connection loss, constraint, lock timeout)
    #[error("Storage error: {message}")]
    Storage {
        /// Description reported by the store
        message: String,
    },

    /// I/O error while reading input or writing a report
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O error
        message: String,
    },

    /// CSV error while reading operations or writing output
    #[error("CSV error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Csv {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the CSV error
        message: String,
    },
}

impl BalanceError {
    /// Create a UserNotFound error
    pub fn user_not_found(user_id: UserId) -> Self {
        BalanceError::UserNotFound { user_id }
    }

    /// Create a ServiceNotFound error
    pub fn service_not_found(service_id: ServiceId) -> Self {
        BalanceError::ServiceNotFound { service_id }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(user_id: UserId, available: Amount, requested: Amount) -> Self {
        BalanceError::InsufficientFunds {
            user_id,
            available,
            requested,
        }
    }

    /// Create a ReservationNotFound error
    pub fn reservation_not_found(reservation_id: ReservationId, user_id: UserId) -> Self {
        BalanceError::ReservationNotFound {
            reservation_id,
            user_id,
        }
    }

    /// Create a NoHistory error
    pub fn no_history(user_id: UserId) -> Self {
        BalanceError::NoHistory { user_id }
    }

    /// Create an InvalidAmount error
    pub fn invalid_amount(amount: Amount) -> Self {
        BalanceError::InvalidAmount { amount }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str, user_id: UserId) -> Self {
        BalanceError::ArithmeticOverflow {
            operation: operation.to_string(),
            user_id,
        }
    }

    /// Create a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        BalanceError::Storage {
            message: message.into(),
        }
    }

    /// Whether the error is a business condition rather than an
    /// infrastructure or integrity failure
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            BalanceError::UserNotFound { .. }
                | BalanceError::ServiceNotFound { .. }
                | BalanceError::InsufficientFunds { .. }
                | BalanceError::ReservationNotFound { .. }
                | BalanceError::NoHistory { .. }
                | BalanceError::InvalidAmount { .. }
                | BalanceError::SelfTransfer { .. }
                | BalanceError::InvalidPeriod { .. }
        )
    }
}

impl From<std::io::Error> for BalanceError {
    fn from(error: std::io::Error) -> Self {
        BalanceError::Io {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for BalanceError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        BalanceError::Csv {
            line,
            message: error.to_string(),
        }
    }
}

impl From<csv_async::Error> for BalanceError {
    fn from(error: csv_async::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        BalanceError::Csv {
            line,
            message: error.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for BalanceError {
    fn from(error: sqlx::Error) -> Self {
        BalanceError::Storage {
            message: error.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for BalanceError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        BalanceError::Storage {
            message: error.to_string(),
        }
    }
}
