//! PostgreSQL store
//!
//! Row locks are taken with `SELECT ... FOR UPDATE` inside a pooled
//! transaction. Account reads also take a transaction-scoped advisory lock on
//! the user id, since `FOR UPDATE` locks nothing while the row is missing. Statements are built at runtime with bound parameters; the
//! only interpolated fragments are the history ORDER BY column and direction,
//! both produced from closed enums.

use crate::store::traits::{NewReserveDetail, Store, StoreTx};
use crate::types::{
    Account, Amount, BalanceError, BalanceSnapshot, Direction, LogEntry, ReportEntry,
    ReservationId, ReservationKey, ReserveAccount, ServiceId, SortField, UserId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled PostgreSQL implementation of [`Store`]
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgStore {
    /// Connect a pool of at most `max_connections` connections
    ///
    /// With `lock_timeout` set, every transaction gives up waiting on a row
    /// lock after that long and fails with a `Storage` error.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Option<Duration>,
    ) -> Result<Self, BalanceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;

        info!(max_connections, "PostgreSQL connection pool established");
        Ok(PgStore::from_pool(pool, lock_timeout))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, lock_timeout: Option<Duration>) -> Self {
        PgStore { pool, lock_timeout }
    }

    /// Underlying pool, for maintenance queries outside the ledger API
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), BalanceError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database schema up to date");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<Self::Tx, BalanceError> {
        let mut tx = self.pool.begin().await?;
        if let Some(timeout) = self.lock_timeout {
            // SET does not accept bind parameters
            sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }
        Ok(PgTx { tx })
    }

    async fn get_account(&self, user_id: UserId) -> Result<Option<Account>, BalanceError> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance.map(|balance| Account::new(user_id, balance)))
    }

    async fn get_reserve_account(
        &self,
        user_id: UserId,
    ) -> Result<Option<ReserveAccount>, BalanceError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM money_reserve_accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.map(|balance| ReserveAccount { user_id, balance }))
    }

    async fn service_title(&self, service_id: ServiceId) -> Result<Option<String>, BalanceError> {
        Ok(sqlx::query_scalar("SELECT title FROM services WHERE id = $1")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn register_service(&self, service_id: ServiceId, title: &str) -> Result<(), BalanceError> {
        sqlx::query(
            "INSERT INTO services (id, title) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title",
        )
        .bind(service_id)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(
        &self,
        user_id: UserId,
        sort_field: SortField,
        direction: Direction,
    ) -> Result<Vec<LogEntry>, BalanceError> {
        // `id` breaks ties in insertion order
        let sql = format!(
            "SELECT date, amount, description FROM logs WHERE user_id = $1 ORDER BY {} {}, id",
            sort_field.column(),
            direction.keyword()
        );
        let rows: Vec<(NaiveDate, i64, String)> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(date, amount, description)| LogEntry {
                user_id,
                date,
                amount,
                description,
            })
            .collect())
    }

    async fn report_totals(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<String, Amount>, BalanceError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT s.title, SUM(r.amount)::BIGINT
            FROM report r
            JOIN services s ON s.id = r.service_id
            WHERE r.date BETWEEN $1 AND $2
            GROUP BY s.title
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn accounts(&self) -> Result<Vec<BalanceSnapshot>, BalanceError> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT u.id, u.balance, COALESCE(m.balance, 0)
            FROM users u
            LEFT JOIN money_reserve_accounts m ON m.user_id = u.id
            ORDER BY u.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, balance, reserved)| BalanceSnapshot {
                user_id,
                balance,
                reserved,
            })
            .collect())
    }
}

/// Open transaction on a [`PgStore`]
///
/// Dropping it without commit rolls the transaction back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn account_for_update(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Account>, BalanceError> {
        // Held until commit or rollback; serializes opening a new account
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(balance.map(|balance| Account::new(user_id, balance)))
    }

    async fn insert_account(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError> {
        sqlx::query("INSERT INTO users (id, balance) VALUES ($1, $2)")
            .bind(user_id)
            .bind(balance)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_account_balance(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError> {
        sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_reserve_account(&mut self, user_id: UserId) -> Result<(), BalanceError> {
        sqlx::query("INSERT INTO money_reserve_accounts (user_id, balance) VALUES ($1, 0)")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn reserve_balance_for_update(
        &mut self,
        user_id: UserId,
    ) -> Result<Option<Amount>, BalanceError> {
        Ok(sqlx::query_scalar(
            "SELECT balance FROM money_reserve_accounts WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn update_reserve_balance(
        &mut self,
        user_id: UserId,
        balance: Amount,
    ) -> Result<(), BalanceError> {
        sqlx::query("UPDATE money_reserve_accounts SET balance = $1 WHERE user_id = $2")
            .bind(balance)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_reserve_detail(
        &mut self,
        detail: NewReserveDetail,
    ) -> Result<ReservationId, BalanceError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO money_reserve_details (user_id, service_id, order_id, amount, date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(detail.user_id)
        .bind(detail.service_id)
        .bind(detail.order_id)
        .bind(detail.amount)
        .bind(detail.date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(ReservationId(id))
    }

    async fn delete_reserve_detail(&mut self, key: ReservationKey) -> Result<u64, BalanceError> {
        let result = sqlx::query(
            r#"
            DELETE FROM money_reserve_details
            WHERE id = $1 AND user_id = $2 AND service_id = $3 AND order_id = $4 AND amount = $5
            "#,
        )
        .bind(key.id.0)
        .bind(key.user_id)
        .bind(key.service_id)
        .bind(key.order_id)
        .bind(key.amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_log_entry(&mut self, entry: LogEntry) -> Result<(), BalanceError> {
        sqlx::query("INSERT INTO logs (user_id, date, amount, description) VALUES ($1, $2, $3, $4)")
            .bind(entry.user_id)
            .bind(entry.date)
            .bind(entry.amount)
            .bind(entry.description)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_report_entry(&mut self, entry: ReportEntry) -> Result<(), BalanceError> {
        sqlx::query("INSERT INTO report (user_id, service_id, amount, date) VALUES ($1, $2, $3, $4)")
            .bind(entry.user_id)
            .bind(entry.service_id)
            .bind(entry.amount)
            .bind(entry.date)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), BalanceError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), BalanceError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
