//! Asynchronous CSV reader with batch interface
//!
//! Streams operation rows from a CSV source and hands them out in batches of
//! validated [`Operation`]s.
//!
//! # Design
//!
//! The AsyncReader uses:
//! - csv-async for streaming CSV parsing
//! - the csv_format module for field validation
//! - Batch reading so the whole input never has to sit in memory
//!
//! ```text
//! CSV source → AsyncReader → Batches of Operations
//!                  ↓
//!           csv_format module
//!     (OperationRecord, convert_operation_record)
//! ```
//!
//! Malformed or invalid rows are logged with their line number and skipped.

use crate::io::csv_format::{convert_operation_record, OperationRecord};
use crate::types::{BalanceError, Operation};
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

/// Asynchronous operation reader
///
/// Provides a batch reading interface over operation records.
/// Keeps count of the rows it had to skip.
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    rows_read: u64,
    rows_skipped: u64,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    /// Create a new AsyncReader from an async reader
    ///
    /// Fields are trimmed and rows may omit trailing empty columns.
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self {
            csv_reader,
            rows_read: 0,
            rows_skipped: 0,
        }
    }

    /// Read a batch of operations
    ///
    /// Reads up to `batch_size` valid operations. Invalid rows are logged
    /// with `tracing::warn!` and skipped; they do not count towards the batch.
    ///
    /// # Returns
    ///
    /// The operations read, in input order. An empty vector means the end of
    /// the input was reached.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<Operation> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<OperationRecord>();

        while batch.len() < batch_size {
            let Some(next) = records.next().await else {
                break;
            };
            self.rows_read += 1;
            // Data rows start on line 2, after the header
            let line = self.rows_read + 1;

            match next {
                Ok(record) => match convert_operation_record(record) {
                    Ok(operation) => batch.push(operation),
                    Err(reason) => {
                        self.rows_skipped += 1;
                        warn!(line, %reason, "skipping invalid operation");
                    }
                },
                Err(error) => {
                    self.rows_skipped += 1;
                    let error = BalanceError::from(error);
                    warn!(line, %error, "skipping malformed row");
                }
            }
        }

        batch
    }

    /// Number of data rows consumed so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Number of rows rejected by parsing or validation
    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }
}
