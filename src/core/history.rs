//! History and report queries
//!
//! Read-only operations over the audit log and the report table. Neither
//! takes row locks.

use crate::core::engine::{today, BalanceEngine};
use crate::store::Store;
use crate::types::{Amount, BalanceError, HistoryQuery, LogEntry};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Earliest year a monthly report may be requested for
pub const MIN_REPORT_YEAR: i32 = 1970;

/// Inclusive date range a report aggregates over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
    from: NaiveDate,
    to: NaiveDate,
    monthly: bool,
}

impl ReportPeriod {
    /// Calendar month `month` of `year`
    ///
    /// # Errors
    ///
    /// Returns `InvalidPeriod` unless `1 <= month <= 12` and `year >= 1970`.
    pub fn month(year: i32, month: u32) -> Result<Self, BalanceError> {
        let invalid = || BalanceError::InvalidPeriod { month, year };
        if year < MIN_REPORT_YEAR {
            return Err(invalid());
        }

        let from = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        };
        let to = next.and_then(|d| d.pred_opt()).ok_or_else(invalid)?;

        Ok(ReportPeriod {
            from,
            to,
            monthly: true,
        })
    }

    /// The month containing today
    pub fn current() -> Self {
        let now = today();
        let from = now.with_day(1).unwrap_or(now);
        let to = ReportPeriod::month(now.year(), now.month())
            .map(|period| period.to)
            .unwrap_or(now);
        ReportPeriod {
            from,
            to,
            monthly: true,
        }
    }

    /// Arbitrary inclusive range; bounds given in reverse order are swapped
    pub fn range(from: NaiveDate, to: NaiveDate) -> Self {
        let (from, to) = if from <= to { (from, to) } else { (to, from) };
        ReportPeriod {
            from,
            to,
            monthly: false,
        }
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    /// Short label used in report file names
    pub fn label(&self) -> String {
        if self.monthly {
            self.from.format("%Y-%m").to_string()
        } else {
            format!("{}_{}", self.from, self.to)
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Confirmed spending per service title over a period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub period: ReportPeriod,
    pub totals: BTreeMap<String, Amount>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

impl<S: Store> BalanceEngine<S> {
    /// Audit trail of a user in the requested order
    ///
    /// # Errors
    ///
    /// Returns `NoHistory` when the user has no log entries, which also covers
    /// unknown users.
    pub async fn get_history(&self, query: HistoryQuery) -> Result<Vec<LogEntry>, BalanceError> {
        let entries = self
            .store()
            .history(query.user_id, query.sort_field, query.direction)
            .await?;

        if entries.is_empty() {
            debug!(
                user_id = query.user_id,
                sort_field = %query.sort_field,
                direction = %query.direction,
                "no history"
            );
            return Err(BalanceError::no_history(query.user_id));
        }
        Ok(entries)
    }

    /// Totals of confirmed reservations per service title for `month`/`year`
    pub async fn create_report(&self, month: u32, year: i32) -> Result<Report, BalanceError> {
        let period = ReportPeriod::month(year, month)?;
        self.report_for(period).await
    }

    /// Totals of confirmed reservations per service title for `period`
    ///
    /// Report entries whose service is missing from the catalog are left out.
    pub async fn report_for(&self, period: ReportPeriod) -> Result<Report, BalanceError> {
        let totals = self.store().report_totals(period.from, period.to).await?;
        debug!(%period, services = totals.len(), "report aggregated");
        Ok(Report { period, totals })
    }
}
