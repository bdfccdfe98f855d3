//! Replayable operations
//!
//! An operation is one validated row of the replay input, ready to be applied
//! to the balance engine.

use super::account::{Amount, OrderId, ServiceId, UserId};
use super::reservation::{Deposit, Reservation, ReservationId, Settlement, Transfer};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a replayable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Credit a user's balance, opening the account if needed
    Deposit,

    /// Move funds between two existing accounts
    Transfer,

    /// Hold funds for a service order
    Reserve,

    /// Consume a reservation and record it for reporting
    Confirm,

    /// Release a reservation back to the balance
    Cancel,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationType::Deposit => "deposit",
            OperationType::Transfer => "transfer",
            OperationType::Reserve => "reserve",
            OperationType::Confirm => "confirm",
            OperationType::Cancel => "cancel",
        })
    }
}

/// Confirm or cancel row whose reservation id may be omitted
///
/// Without an id, the replay resolves the oldest open reservation it created
/// for the same user, service and order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementRequest {
    pub reservation_id: Option<ReservationId>,
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub order_id: OrderId,
    pub amount: Amount,
    pub date: Option<NaiveDate>,
}

impl SettlementRequest {
    /// Complete the request with a resolved reservation id
    pub fn resolve(&self, reservation_id: ReservationId) -> Settlement {
        Settlement {
            reservation_id,
            user_id: self.user_id,
            service_id: self.service_id,
            order_id: self.order_id,
            amount: self.amount,
            date: self.date,
        }
    }
}

/// Validated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deposit(Deposit),
    Transfer(Transfer),
    Reserve(Reservation),
    Confirm(SettlementRequest),
    Cancel(SettlementRequest),
}

impl Operation {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Operation::Deposit(_) => OperationType::Deposit,
            Operation::Transfer(_) => OperationType::Transfer,
            Operation::Reserve(_) => OperationType::Reserve,
            Operation::Confirm(_) => OperationType::Confirm,
            Operation::Cancel(_) => OperationType::Cancel,
        }
    }

    /// User whose balance the operation is initiated from
    pub fn user_id(&self) -> UserId {
        match self {
            Operation::Deposit(deposit) => deposit.user_id,
            Operation::Transfer(transfer) => transfer.from_user_id,
            Operation::Reserve(reservation) => reservation.user_id,
            Operation::Confirm(request) | Operation::Cancel(request) => request.user_id,
        }
    }
}
