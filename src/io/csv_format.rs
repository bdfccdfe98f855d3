//! CSV format handling for operation records, balances and reports
//!
//! This module centralizes all CSV format concerns, providing:
//! - `OperationRecord` structure for deserialization
//! - Field validation and conversion from records to [`Operation`]s
//! - Service catalog parsing
//! - Balance and report serialization
//!
//! Conversion and serialization are pure (no file I/O) for easy testing.

use crate::core::history::Report;
use crate::types::{
    Amount, BalanceError, BalanceSnapshot, Deposit, Operation, OperationType, OrderId,
    Reservation, ReservationId, ServiceId, SettlementRequest, Transfer, UserId,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::{Read, Write};

/// Date layout of the `date` column
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// CSV record structure for deserialization
///
/// Matches the input CSV format with columns:
/// `type, user, to_user, service, order, amount, date, reservation`.
/// Which columns are required depends on the operation type; the rest may be
/// left empty.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct OperationRecord {
    #[serde(rename = "type")]
    pub op_type: String,
    pub user: Option<UserId>,
    pub to_user: Option<UserId>,
    pub service: Option<ServiceId>,
    pub order: Option<OrderId>,
    pub amount: Option<Amount>,
    pub date: Option<String>,
    pub reservation: Option<i64>,
}

/// Service catalog row (`id,title`)
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub id: ServiceId,
    pub title: String,
}

fn parse_type(op_type: &str) -> Result<OperationType, String> {
    match op_type.trim().to_lowercase().as_str() {
        "deposit" => Ok(OperationType::Deposit),
        "transfer" => Ok(OperationType::Transfer),
        "reserve" => Ok(OperationType::Reserve),
        "confirm" => Ok(OperationType::Confirm),
        "cancel" => Ok(OperationType::Cancel),
        _ => Err(format!("Invalid operation type: '{}'", op_type)),
    }
}

/// Require a present, strictly positive value
fn positive(value: Option<i64>, field: &str, op_type: OperationType) -> Result<i64, String> {
    match value {
        Some(v) if v > 0 => Ok(v),
        Some(v) => Err(format!("{} {} must be greater than 0, got {}", op_type, field, v)),
        None => Err(format!("{} requires {}", op_type, field)),
    }
}

/// Parse an optional `YYYY-MM-DD` date
///
/// Empty or unparseable dates yield `None`, which the engine replaces with
/// today's date.
pub fn parse_date(date: Option<&str>) -> Option<NaiveDate> {
    date.map(str::trim)
        .filter(|d| !d.is_empty())
        .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())
}

/// Convert an OperationRecord to an Operation
///
/// This function:
/// - Parses the operation type (case-insensitive)
/// - Checks that every field the type needs is present and positive
/// - Rejects transfers to the sending user
/// - Parses the optional date
///
/// # Arguments
///
/// * `record` - The deserialized CSV record
///
/// # Returns
///
/// Result containing either:
/// - Ok(Operation) - Validated operation
/// - Err(String) - Error message describing the first invalid field
pub fn convert_operation_record(record: OperationRecord) -> Result<Operation, String> {
    let op_type = parse_type(&record.op_type)?;
    let user_id = positive(record.user, "user", op_type)?;
    let amount = positive(record.amount, "amount", op_type)?;
    let date = parse_date(record.date.as_deref());

    let operation = match op_type {
        OperationType::Deposit => Operation::Deposit(Deposit {
            user_id,
            amount,
            date,
        }),
        OperationType::Transfer => {
            let to_user_id = positive(record.to_user, "to_user", op_type)?;
            if to_user_id == user_id {
                return Err(format!("transfer from user {} to itself", user_id));
            }
            Operation::Transfer(Transfer {
                from_user_id: user_id,
                to_user_id,
                amount,
                date,
            })
        }
        OperationType::Reserve => Operation::Reserve(Reservation {
            user_id,
            service_id: positive(record.service, "service", op_type)?,
            order_id: positive(record.order, "order", op_type)?,
            amount,
            date,
        }),
        OperationType::Confirm | OperationType::Cancel => {
            let reservation_id = record
                .reservation
                .map(|id| positive(Some(id), "reservation", op_type).map(ReservationId))
                .transpose()?;
            let request = SettlementRequest {
                reservation_id,
                user_id,
                service_id: positive(record.service, "service", op_type)?,
                order_id: positive(record.order, "order", op_type)?,
                amount,
                date,
            };
            if op_type == OperationType::Confirm {
                Operation::Confirm(request)
            } else {
                Operation::Cancel(request)
            }
        }
    };

    Ok(operation)
}

/// Read the service catalog from CSV with an `id,title` header
pub fn read_services_csv<R: Read>(input: R) -> Result<Vec<ServiceRecord>, BalanceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);

    reader
        .deserialize::<ServiceRecord>()
        .map(|record| record.map_err(BalanceError::from))
        .collect()
}

/// Write account balances to CSV format
///
/// Writes balances with columns: user, balance, reserved.
/// Rows are sorted by user ID for deterministic output.
///
/// # Arguments
///
/// * `balances` - Slice of balance snapshots to write
/// * `output` - Mutable reference to a writer for outputting CSV
pub fn write_balances_csv(
    balances: &[BalanceSnapshot],
    output: &mut dyn Write,
) -> Result<(), BalanceError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["user", "balance", "reserved"])?;

    let mut sorted = balances.to_vec();
    sorted.sort_by_key(|snapshot| snapshot.user_id);

    for snapshot in sorted {
        writer.write_record(&[
            snapshot.user_id.to_string(),
            snapshot.balance.to_string(),
            snapshot.reserved.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write a report as headerless `title;amount` rows, ordered by title
pub fn write_report_csv(report: &Report, output: &mut dyn Write) -> Result<(), BalanceError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(output);

    for (title, amount) in &report.totals {
        writer.write_record([title.as_str(), amount.to_string().as_str()])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::ReportPeriod;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn record(op_type: &str) -> OperationRecord {
        OperationRecord {
            op_type: op_type.to_string(),
            user: Some(1),
            to_user: Some(2),
            service: Some(3),
            order: Some(4),
            amount: Some(100),
            date: Some("2022-10-05".to_string()),
            reservation: None,
        }
    }

    fn oct(day: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2022, 10, day)
    }

    #[rstest]
    #[case::deposit("deposit", OperationType::Deposit)]
    #[case::transfer("transfer", OperationType::Transfer)]
    #[case::reserve("reserve", OperationType::Reserve)]
    #[case::confirm("confirm", OperationType::Confirm)]
    #[case::cancel("cancel", OperationType::Cancel)]
    #[case::upper_case("DEPOSIT", OperationType::Deposit)]
    #[case::padded("  Reserve ", OperationType::Reserve)]
    fn test_convert_operation_type(#[case] op_type: &str, #[case] expected: OperationType) {
        let operation = convert_operation_record(record(op_type)).unwrap();
        assert_eq!(operation.operation_type(), expected);
        assert_eq!(operation.user_id(), 1);
    }

    #[test]
    fn test_convert_transfer_fields() {
        assert_eq!(
            convert_operation_record(record("transfer")),
            Ok(Operation::Transfer(Transfer {
                from_user_id: 1,
                to_user_id: 2,
                amount: 100,
                date: oct(5),
            }))
        );
    }

    #[test]
    fn test_convert_settlement_with_reservation_id() {
        let operation = convert_operation_record(OperationRecord {
            reservation: Some(7),
            ..record("cancel")
        })
        .unwrap();

        assert_eq!(
            operation,
            Operation::Cancel(SettlementRequest {
                reservation_id: Some(ReservationId(7)),
                user_id: 1,
                service_id: 3,
                order_id: 4,
                amount: 100,
                date: oct(5),
            })
        );
    }

    #[rstest]
    #[case::invalid_type(OperationRecord { op_type: "withdraw".into(), ..record("deposit") }, "Invalid operation type")]
    #[case::missing_user(OperationRecord { user: None, ..record("deposit") }, "requires user")]
    #[case::zero_user(OperationRecord { user: Some(0), ..record("deposit") }, "user must be greater than 0")]
    #[case::missing_amount(OperationRecord { amount: None, ..record("deposit") }, "requires amount")]
    #[case::negative_amount(OperationRecord { amount: Some(-5), ..record("reserve") }, "amount must be greater than 0")]
    #[case::missing_receiver(OperationRecord { to_user: None, ..record("transfer") }, "requires to_user")]
    #[case::self_transfer(OperationRecord { to_user: Some(1), ..record("transfer") }, "to itself")]
    #[case::missing_service(OperationRecord { service: None, ..record("reserve") }, "requires service")]
    #[case::zero_order(OperationRecord { order: Some(0), ..record("confirm") }, "order must be greater than 0")]
    #[case::zero_reservation(OperationRecord { reservation: Some(0), ..record("confirm") }, "reservation must be greater than 0")]
    fn test_convert_operation_record_errors(
        #[case] input: OperationRecord,
        #[case] expected_error: &str,
    ) {
        let result = convert_operation_record(input);
        assert!(result.unwrap_err().contains(expected_error));
    }

    #[rstest]
    #[case::valid(Some("2022-10-05"), oct(5))]
    #[case::padded(Some(" 2022-10-05 "), oct(5))]
    #[case::empty(Some(""), None)]
    #[case::absent(None, None)]
    #[case::wrong_layout(Some("05.10.2022"), None)]
    #[case::impossible(Some("2022-02-30"), None)]
    fn test_parse_date(#[case] input: Option<&str>, #[case] expected: Option<NaiveDate>) {
        assert_eq!(parse_date(input), expected);
    }

    #[test]
    fn test_read_services_csv() {
        let input = "id,title\n1, Delivery \n2,Hosting\n";
        let services = read_services_csv(input.as_bytes()).unwrap();
        assert_eq!(
            services,
            vec![
                ServiceRecord {
                    id: 1,
                    title: "Delivery".to_string()
                },
                ServiceRecord {
                    id: 2,
                    title: "Hosting".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_read_services_csv_bad_id() {
        let input = "id,title\nx,Delivery\n";
        assert!(matches!(
            read_services_csv(input.as_bytes()),
            Err(BalanceError::Csv { .. })
        ));
    }

    #[rstest]
    #[case::sorted_by_user(
        vec![
            BalanceSnapshot { user_id: 3, balance: 0, reserved: 0 },
            BalanceSnapshot { user_id: 1, balance: 60, reserved: 40 },
        ],
        "user,balance,reserved\n1,60,40\n3,0,0\n"
    )]
    #[case::empty(vec![], "user,balance,reserved\n")]
    fn test_write_balances_csv(#[case] balances: Vec<BalanceSnapshot>, #[case] expected: &str) {
        let mut output = Vec::new();
        write_balances_csv(&balances, &mut output).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }

    #[test]
    fn test_write_report_csv() {
        let report = Report {
            period: ReportPeriod::month(2022, 10).unwrap(),
            totals: BTreeMap::from([("Hosting".to_string(), 70), ("Delivery".to_string(), 150)]),
        };

        let mut output = Vec::new();
        write_report_csv(&report, &mut output).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "Delivery;150\nHosting;70\n");
    }
}
