//! Core business logic module
//!
//! This module contains the balance processing components:
//! - `engine` - Balance mutations, each in one store transaction
//! - `history` - Audit history and report queries

pub mod engine;
pub mod history;

pub use engine::BalanceEngine;
pub use history::{Report, ReportPeriod};
