//! Balance mutation engine
//!
//! This module provides the `BalanceEngine` that implements the balance
//! operations on top of a [`Store`]. Each mutating operation runs inside one
//! store transaction and either commits every write or rolls all of them back.
//!
//! The engine enforces business rules such as:
//! - Balances never go negative (checked under row lock)
//! - Held funds are always backed by a prior debit of the main balance
//! - Every balance change is paired with an audit log entry
//! - Account rows are locked in ascending user id order, then reserve rows

use crate::store::{NewReserveDetail, Store, StoreTx};
use crate::types::{
    Account, Amount, BalanceError, Deposit, LogEntry, ReportEntry, Reservation, ReservationId,
    ReserveAccount, ServiceId, Settlement, Transfer, UserId,
};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

const TOP_UP_DESCRIPTION: &str = "Balance top-up";

/// Today's date in local time, used when a request carries no date
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Balance operations over a transactional store
///
/// The engine holds no state of its own: every operation reads and writes
/// through the store, and all mutual exclusion comes from the store's row
/// locks. It can be shared between tasks behind an `Arc`.
#[derive(Debug, Clone)]
pub struct BalanceEngine<S> {
    store: S,
}

impl<S: Store> BalanceEngine<S> {
    /// Create an engine over `store`
    pub fn new(store: S) -> Self {
        BalanceEngine { store }
    }

    /// Access the underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read the spendable balance of a user
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if the user never received a deposit.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Account, BalanceError> {
        self.store
            .get_account(user_id)
            .await?
            .ok_or_else(|| BalanceError::user_not_found(user_id))
    }

    /// Read the funds currently held for a user's open reservations
    pub async fn get_reserve(&self, user_id: UserId) -> Result<ReserveAccount, BalanceError> {
        self.store
            .get_reserve_account(user_id)
            .await?
            .ok_or_else(|| BalanceError::user_not_found(user_id))
    }

    /// Credit a user's balance
    ///
    /// Opens the account (and its zero reserve account) when the user is
    /// unknown. The account row is locked first, so concurrent top-ups and
    /// reservations of the same user serialize.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `ArithmeticOverflow` if the balance would overflow
    pub async fn replenish(&self, deposit: Deposit) -> Result<(), BalanceError> {
        validate_amount(deposit.amount)?;
        let date = deposit.date.unwrap_or_else(today);

        let mut tx = self.store.begin().await?;
        let result = Self::apply_replenish(&mut tx, &deposit, date).await;
        finish(tx, "replenish", deposit.user_id, result).await?;

        info!(
            user_id = deposit.user_id,
            amount = deposit.amount,
            %date,
            "balance replenished"
        );
        Ok(())
    }

    async fn apply_replenish(
        tx: &mut S::Tx,
        deposit: &Deposit,
        date: NaiveDate,
    ) -> Result<(), BalanceError> {
        match tx.account_for_update(deposit.user_id).await? {
            Some(account) => {
                let balance = account
                    .balance
                    .checked_add(deposit.amount)
                    .ok_or_else(|| BalanceError::arithmetic_overflow("replenish", deposit.user_id))?;
                tx.update_account_balance(deposit.user_id, balance).await?;
            }
            None => {
                tx.insert_account(deposit.user_id, deposit.amount).await?;
                tx.insert_reserve_account(deposit.user_id).await?;
            }
        }

        tx.insert_log_entry(LogEntry {
            user_id: deposit.user_id,
            date,
            amount: deposit.amount,
            description: TOP_UP_DESCRIPTION.to_string(),
        })
        .await
    }

    /// Move funds from one existing account to another
    ///
    /// Both account rows are locked, lower user id first, before either is
    /// modified, so the funds check cannot be invalidated by a concurrent
    /// transfer and two opposite transfers cannot deadlock.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `SelfTransfer` if both sides are the same user
    /// - `UserNotFound` if either account is missing
    /// - `InsufficientFunds` if the sender cannot cover `amount`
    pub async fn transfer(&self, transfer: Transfer) -> Result<(), BalanceError> {
        validate_amount(transfer.amount)?;
        if transfer.from_user_id == transfer.to_user_id {
            return Err(BalanceError::SelfTransfer {
                user_id: transfer.from_user_id,
            });
        }
        let date = transfer.date.unwrap_or_else(today);

        let mut tx = self.store.begin().await?;
        let result = Self::apply_transfer(&mut tx, &transfer, date).await;
        finish(tx, "transfer", transfer.from_user_id, result).await?;

        info!(
            from_user_id = transfer.from_user_id,
            to_user_id = transfer.to_user_id,
            amount = transfer.amount,
            %date,
            "transfer committed"
        );
        Ok(())
    }

    async fn apply_transfer(
        tx: &mut S::Tx,
        transfer: &Transfer,
        date: NaiveDate,
    ) -> Result<(), BalanceError> {
        let from = transfer.from_user_id;
        let to = transfer.to_user_id;

        let (sender, receiver) = if from < to {
            let sender = tx.account_for_update(from).await?;
            let receiver = tx.account_for_update(to).await?;
            (sender, receiver)
        } else {
            let receiver = tx.account_for_update(to).await?;
            let sender = tx.account_for_update(from).await?;
            (sender, receiver)
        };
        let sender = sender.ok_or_else(|| BalanceError::user_not_found(from))?;
        let receiver = receiver.ok_or_else(|| BalanceError::user_not_found(to))?;

        let sender_balance = debit(&sender, transfer.amount)?;
        let receiver_balance = receiver
            .balance
            .checked_add(transfer.amount)
            .ok_or_else(|| BalanceError::arithmetic_overflow("transfer", to))?;

        tx.update_account_balance(from, sender_balance).await?;
        tx.insert_log_entry(LogEntry {
            user_id: from,
            date,
            amount: transfer.amount,
            description: format!("Transfer to user {}", to),
        })
        .await?;

        tx.update_account_balance(to, receiver_balance).await?;
        tx.insert_log_entry(LogEntry {
            user_id: to,
            date,
            amount: transfer.amount,
            description: format!("Transfer from user {}", from),
        })
        .await
    }

    /// Hold funds for an order of a catalog service
    ///
    /// Debits the main balance and credits the reserve balance by the same
    /// amount, so their sum is unchanged. Returns the key of the new
    /// reservation, required later to confirm or cancel it.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount <= 0`
    /// - `ServiceNotFound` if the service is not in the catalog
    /// - `UserNotFound` if the account is missing
    /// - `InsufficientFunds` if the balance cannot cover `amount`
    pub async fn reserve(&self, reservation: Reservation) -> Result<ReservationId, BalanceError> {
        validate_amount(reservation.amount)?;
        let title = self.service_title(reservation.service_id).await?;
        let date = reservation.date.unwrap_or_else(today);

        let mut tx = self.store.begin().await?;
        let result = Self::apply_reserve(&mut tx, &reservation, &title, date).await;
        let reservation_id = finish(tx, "reserve", reservation.user_id, result).await?;

        info!(
            user_id = reservation.user_id,
            service_id = reservation.service_id,
            order_id = reservation.order_id,
            amount = reservation.amount,
            %reservation_id,
            "funds reserved"
        );
        Ok(reservation_id)
    }

    async fn apply_reserve(
        tx: &mut S::Tx,
        reservation: &Reservation,
        title: &str,
        date: NaiveDate,
    ) -> Result<ReservationId, BalanceError> {
        let user_id = reservation.user_id;
        let account = tx
            .account_for_update(user_id)
            .await?
            .ok_or_else(|| BalanceError::user_not_found(user_id))?;
        let balance = debit(&account, reservation.amount)?;

        let reserved = tx
            .reserve_balance_for_update(user_id)
            .await?
            .ok_or_else(|| BalanceError::user_not_found(user_id))?
            .checked_add(reservation.amount)
            .ok_or_else(|| BalanceError::arithmetic_overflow("reserve", user_id))?;

        tx.update_account_balance(user_id, balance).await?;
        tx.update_reserve_balance(user_id, reserved).await?;

        let reservation_id = tx
            .insert_reserve_detail(NewReserveDetail {
                user_id,
                service_id: reservation.service_id,
                order_id: reservation.order_id,
                amount: reservation.amount,
                date,
            })
            .await?;

        tx.insert_log_entry(LogEntry {
            user_id,
            date,
            amount: reservation.amount,
            description: format!("Order {}, service \"{}\"", reservation.order_id, title),
        })
        .await?;

        Ok(reservation_id)
    }

    /// Release an open reservation back to the main balance
    ///
    /// # Errors
    ///
    /// - `ServiceNotFound` if the service is not in the catalog
    /// - `UserNotFound` if the account is missing
    /// - `ReservationNotFound` if no open reservation matches the settlement
    pub async fn cancel_reservation(&self, settlement: Settlement) -> Result<(), BalanceError> {
        validate_amount(settlement.amount)?;
        let title = self.service_title(settlement.service_id).await?;
        let date = settlement.date.unwrap_or_else(today);

        let mut tx = self.store.begin().await?;
        let result = Self::apply_cancel(&mut tx, &settlement, &title, date).await;
        finish(tx, "cancel_reservation", settlement.user_id, result).await?;

        info!(
            user_id = settlement.user_id,
            reservation_id = %settlement.reservation_id,
            amount = settlement.amount,
            "reservation cancelled"
        );
        Ok(())
    }

    async fn apply_cancel(
        tx: &mut S::Tx,
        settlement: &Settlement,
        title: &str,
        date: NaiveDate,
    ) -> Result<(), BalanceError> {
        let user_id = settlement.user_id;
        let account = tx
            .account_for_update(user_id)
            .await?
            .ok_or_else(|| BalanceError::user_not_found(user_id))?;
        let reserved = tx
            .reserve_balance_for_update(user_id)
            .await?
            .ok_or_else(|| BalanceError::user_not_found(user_id))?;

        if tx.delete_reserve_detail(settlement.key()).await? == 0 {
            return Err(BalanceError::reservation_not_found(
                settlement.reservation_id,
                user_id,
            ));
        }

        tx.insert_log_entry(LogEntry {
            user_id,
            date,
            amount: settlement.amount,
            description: format!(
                "Cancelled order {}, service \"{}\"",
                settlement.order_id, title
            ),
        })
        .await?;

        let balance = account
            .balance
            .checked_add(settlement.amount)
            .ok_or_else(|| BalanceError::arithmetic_overflow("cancel_reservation", user_id))?;
        let reserved = release(reserved, settlement.amount, "cancel_reservation", user_id)?;

        tx.update_account_balance(user_id, balance).await?;
        tx.update_reserve_balance(user_id, reserved).await
    }

    /// Consume an open reservation and record it for reporting
    ///
    /// The main balance is not touched: the amount was already debited when
    /// the funds were reserved.
    ///
    /// # Errors
    ///
    /// - `UserNotFound` if the reserve account is missing
    /// - `ReservationNotFound` if no open reservation matches the settlement
    pub async fn confirm(&self, settlement: Settlement) -> Result<(), BalanceError> {
        validate_amount(settlement.amount)?;
        let date = settlement.date.unwrap_or_else(today);

        let mut tx = self.store.begin().await?;
        let result = Self::apply_confirm(&mut tx, &settlement, date).await;
        finish(tx, "confirm", settlement.user_id, result).await?;

        info!(
            user_id = settlement.user_id,
            reservation_id = %settlement.reservation_id,
            service_id = settlement.service_id,
            amount = settlement.amount,
            "reservation confirmed"
        );
        Ok(())
    }

    async fn apply_confirm(
        tx: &mut S::Tx,
        settlement: &Settlement,
        date: NaiveDate,
    ) -> Result<(), BalanceError> {
        let user_id = settlement.user_id;
        let reserved = tx
            .reserve_balance_for_update(user_id)
            .await?
            .ok_or_else(|| BalanceError::user_not_found(user_id))?;

        if tx.delete_reserve_detail(settlement.key()).await? == 0 {
            return Err(BalanceError::reservation_not_found(
                settlement.reservation_id,
                user_id,
            ));
        }

        let reserved = release(reserved, settlement.amount, "confirm", user_id)?;
        tx.update_reserve_balance(user_id, reserved).await?;

        tx.insert_report_entry(ReportEntry {
            user_id,
            service_id: settlement.service_id,
            amount: settlement.amount,
            date,
        })
        .await
    }

    async fn service_title(&self, service_id: ServiceId) -> Result<String, BalanceError> {
        self.store
            .service_title(service_id)
            .await?
            .ok_or_else(|| BalanceError::service_not_found(service_id))
    }
}

fn validate_amount(amount: Amount) -> Result<(), BalanceError> {
    if amount <= 0 {
        return Err(BalanceError::invalid_amount(amount));
    }
    Ok(())
}

/// Balance left after debiting `amount`, or `InsufficientFunds`
fn debit(account: &Account, amount: Amount) -> Result<Amount, BalanceError> {
    match account.balance.checked_sub(amount) {
        Some(balance) if balance >= 0 => Ok(balance),
        _ => Err(BalanceError::insufficient_funds(
            account.id,
            account.balance,
            amount,
        )),
    }
}

/// Reserve balance left after releasing `amount`
///
/// A reserve balance below the amount of one of its own reservations means the
/// reserve invariant is already broken; this is reported as an integrity error.
fn release(
    reserved: Amount,
    amount: Amount,
    operation: &str,
    user_id: UserId,
) -> Result<Amount, BalanceError> {
    match reserved.checked_sub(amount) {
        Some(left) if left >= 0 => Ok(left),
        _ => Err(BalanceError::arithmetic_overflow(operation, user_id)),
    }
}

/// Commit on success, roll back explicitly on failure
async fn finish<T, X: StoreTx>(
    tx: X,
    operation: &'static str,
    user_id: UserId,
    result: Result<T, BalanceError>,
) -> Result<T, BalanceError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(operation, user_id, error = %rollback_error, "rollback failed");
            }
            if error.is_business() {
                debug!(operation, user_id, %error, "operation rejected");
            } else {
                warn!(operation, user_id, %error, "operation failed");
            }
            Err(error)
        }
    }
}
