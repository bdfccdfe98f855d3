//! Reservation and request types
//!
//! Requests reach the engine already shape-validated; the engine still
//! re-checks the business-critical fields (amount sign, self transfer).
//! A `date` of `None` means "today".

use super::account::{Amount, OrderId, ServiceId, UserId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Synthetic key of an open reservation
///
/// Generated by the store on insert and returned from a reservation. The
/// descriptive tuple `(user, service, order, amount)` is kept alongside it and
/// re-checked on settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub i64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An open reservation row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveDetail {
    pub id: ReservationId,
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub order_id: OrderId,
    pub amount: Amount,
    pub date: NaiveDate,
}

/// Fields identifying a reservation row for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationKey {
    pub id: ReservationId,
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub order_id: OrderId,
    pub amount: Amount,
}

impl ReservationKey {
    /// Whether `detail` is the row this key designates
    pub fn matches(&self, detail: &ReserveDetail) -> bool {
        detail.id == self.id
            && detail.user_id == self.user_id
            && detail.service_id == self.service_id
            && detail.order_id == self.order_id
            && detail.amount == self.amount
    }
}

/// Credit a user's balance, opening the account on first use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deposit {
    pub user_id: UserId,
    pub amount: Amount,
    pub date: Option<NaiveDate>,
}

/// Move funds between two existing accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount: Amount,
    pub date: Option<NaiveDate>,
}

/// Hold funds for an order of a catalog service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub order_id: OrderId,
    pub amount: Amount,
    pub date: Option<NaiveDate>,
}

/// Confirm or cancel an open reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub order_id: OrderId,
    pub amount: Amount,
    pub date: Option<NaiveDate>,
}

impl Settlement {
    /// Build a settlement for a reservation returned by the engine
    pub fn of(reservation_id: ReservationId, reservation: &Reservation) -> Self {
        Settlement {
            reservation_id,
            user_id: reservation.user_id,
            service_id: reservation.service_id,
            order_id: reservation.order_id,
            amount: reservation.amount,
            date: reservation.date,
        }
    }

    pub fn key(&self) -> ReservationKey {
        ReservationKey {
            id: self.reservation_id,
            user_id: self.user_id,
            service_id: self.service_id,
            order_id: self.order_id,
            amount: self.amount,
        }
    }
}
