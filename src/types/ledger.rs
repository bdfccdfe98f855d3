//! Audit log and report entries
//!
//! Both tables are append-only: log entries record every balance-affecting
//! event, report entries record confirmed reservations for aggregation.

use super::account::{Amount, ServiceId, UserId};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Audit trail record of one balance-affecting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub amount: Amount,
    pub description: String,
}

/// Confirmed reservation, source of periodic reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub user_id: UserId,
    pub service_id: ServiceId,
    pub amount: Amount,
    pub date: NaiveDate,
}

/// Column a history listing is ordered by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    Date,
    #[default]
    Amount,
}

/// Ordering direction of a history listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "date" => Ok(SortField::Date),
            "amount" => Ok(SortField::Amount),
            other => Err(format!("Unknown sort field '{}'", other)),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(format!("Unknown direction '{}'", other)),
        }
    }
}

impl SortField {
    /// Parse a caller-supplied field, falling back to the default
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// SQL column name for this field
    pub fn column(self) -> &'static str {
        match self {
            SortField::Date => "date",
            SortField::Amount => "amount",
        }
    }
}

impl Direction {
    /// Parse a caller-supplied direction, falling back to the default
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        })
    }
}

/// History listing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub user_id: UserId,
    pub sort_field: SortField,
    pub direction: Direction,
}

impl HistoryQuery {
    /// Build a query from raw sort/direction strings as sent by a client
    pub fn from_raw(user_id: UserId, sort_field: &str, direction: &str) -> Self {
        HistoryQuery {
            user_id,
            sort_field: SortField::parse_or_default(sort_field),
            direction: Direction::parse_or_default(direction),
        }
    }
}
