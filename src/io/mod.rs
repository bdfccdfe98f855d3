//! I/O module
//!
//! Handles CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record validation, output serialization)
//! - `async_reader` - Asynchronous operation reader with batch reading interface
//! - `report_writer` - Report file output

pub mod async_reader;
pub mod csv_format;
pub mod report_writer;

pub use async_reader::AsyncReader;
pub use csv_format::{
    convert_operation_record, read_services_csv, write_balances_csv, write_report_csv,
    OperationRecord, ServiceRecord,
};
pub use report_writer::ReportWriter;
