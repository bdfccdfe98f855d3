//! Operation replay pipeline
//!
//! Reads operations from CSV in batches, applies them one by one to a
//! [`BalanceEngine`], then writes the final balances and, on request, a report.
//!
//! # Error Handling
//!
//! Rows that fail validation are skipped by the reader. Operations the engine
//! rejects for business reasons (unknown user, insufficient funds, ...) are
//! logged and counted, and the replay continues. Infrastructure errors abort
//! the replay.

use crate::config::{AppConfig, Backend, ReportRequest};
use crate::core::engine::BalanceEngine;
use crate::core::history::{Report, ReportPeriod};
use crate::io::{read_services_csv, write_balances_csv, AsyncReader, ReportWriter};
use crate::store::{MemoryStore, Store};
use crate::types::{
    BalanceError, Operation, OrderId, ReservationId, ServiceId, SettlementRequest, UserId,
};
use futures::io::AsyncRead;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{info, warn};

/// Counters of a finished replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Operations the engine committed
    pub applied: u64,
    /// Operations the engine rejected
    pub rejected: u64,
    /// Rows dropped by parsing or validation
    pub skipped: u64,
}

/// Outcome of [`run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub summary: ReplaySummary,
    /// Location of the written report, when one was requested
    pub report_location: Option<String>,
}

type OrderKey = (UserId, ServiceId, OrderId);

/// Applies operations to an engine, remembering the reservations it opened
///
/// Confirm and cancel rows may leave the reservation id empty; they then
/// settle the oldest reservation opened by this replayer for the same user,
/// service and order.
pub struct Replayer<S> {
    engine: BalanceEngine<S>,
    open: HashMap<OrderKey, VecDeque<ReservationId>>,
    summary: ReplaySummary,
}

impl<S: Store> Replayer<S> {
    pub fn new(engine: BalanceEngine<S>) -> Self {
        Self {
            engine,
            open: HashMap::new(),
            summary: ReplaySummary::default(),
        }
    }

    pub fn engine(&self) -> &BalanceEngine<S> {
        &self.engine
    }

    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }

    /// Apply one operation to the engine
    pub async fn apply(&mut self, operation: Operation) -> Result<(), BalanceError> {
        match operation {
            Operation::Deposit(deposit) => self.engine.replenish(deposit).await,
            Operation::Transfer(transfer) => self.engine.transfer(transfer).await,
            Operation::Reserve(reservation) => {
                let id = self.engine.reserve(reservation).await?;
                self.open
                    .entry((
                        reservation.user_id,
                        reservation.service_id,
                        reservation.order_id,
                    ))
                    .or_default()
                    .push_back(id);
                Ok(())
            }
            Operation::Confirm(request) => {
                let id = self.resolve(&request)?;
                self.engine.confirm(request.resolve(id)).await?;
                self.forget(&request, id);
                Ok(())
            }
            Operation::Cancel(request) => {
                let id = self.resolve(&request)?;
                self.engine.cancel_reservation(request.resolve(id)).await?;
                self.forget(&request, id);
                Ok(())
            }
        }
    }

    /// Apply every operation of `reader`, `batch_size` at a time
    ///
    /// Business rejections are logged and counted; the first infrastructure
    /// error stops the replay.
    pub async fn replay<R>(
        &mut self,
        reader: &mut AsyncReader<R>,
        batch_size: usize,
    ) -> Result<ReplaySummary, BalanceError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        loop {
            let batch = reader.read_batch(batch_size).await;
            if batch.is_empty() {
                break;
            }

            for operation in batch {
                match self.apply(operation).await {
                    Ok(()) => self.summary.applied += 1,
                    Err(error) if error.is_business() => {
                        self.summary.rejected += 1;
                        warn!(
                            operation = %operation.operation_type(),
                            user_id = operation.user_id(),
                            %error,
                            "operation rejected"
                        );
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        self.summary.skipped = reader.rows_skipped();
        Ok(self.summary)
    }

    fn key(request: &SettlementRequest) -> OrderKey {
        (request.user_id, request.service_id, request.order_id)
    }

    fn resolve(&self, request: &SettlementRequest) -> Result<ReservationId, BalanceError> {
        if let Some(id) = request.reservation_id {
            return Ok(id);
        }
        self.open
            .get(&Self::key(request))
            .and_then(|ids| ids.front().copied())
            .ok_or_else(|| {
                // No id and nothing opened for this order: nothing can match
                BalanceError::reservation_not_found(ReservationId(0), request.user_id)
            })
    }

    fn forget(&mut self, request: &SettlementRequest, id: ReservationId) {
        let key = Self::key(request);
        if let Some(ids) = self.open.get_mut(&key) {
            ids.retain(|open| *open != id);
            if ids.is_empty() {
                self.open.remove(&key);
            }
        }
    }
}

/// Run the whole replay pipeline described by `config`
///
/// 1. Builds the configured store and loads the service catalog
/// 2. Replays the input file
/// 3. Writes the final balances to `output`
/// 4. Writes the requested report, if any
pub async fn run(config: &AppConfig, output: &mut dyn Write) -> Result<ReplayOutcome, BalanceError> {
    match config.store.backend {
        Backend::Memory => {
            let store = MemoryStore::with_lock_timeout(config.store.lock_timeout);
            run_with_store(store, config, output).await
        }
        Backend::Postgres => run_postgres(config, output).await,
    }
}

#[cfg(feature = "postgres")]
async fn run_postgres(
    config: &AppConfig,
    output: &mut dyn Write,
) -> Result<ReplayOutcome, BalanceError> {
    let url = config
        .store
        .database_url
        .as_deref()
        .ok_or_else(|| BalanceError::storage("the postgres backend requires a database URL"))?;
    let store = crate::store::PgStore::connect(
        url,
        config.store.max_connections,
        config.store.lock_timeout,
    )
    .await?;
    store.migrate().await?;
    run_with_store(store, config, output).await
}

#[cfg(not(feature = "postgres"))]
async fn run_postgres(
    _config: &AppConfig,
    _output: &mut dyn Write,
) -> Result<ReplayOutcome, BalanceError> {
    Err(BalanceError::storage(
        "the postgres backend is not available: rebuild with `--features postgres`",
    ))
}

/// Run the pipeline against an already built store
pub async fn run_with_store<S: Store>(
    store: S,
    config: &AppConfig,
    output: &mut dyn Write,
) -> Result<ReplayOutcome, BalanceError> {
    if let Some(path) = &config.store.services_file {
        let contents = tokio::fs::read(path).await?;
        let services = read_services_csv(contents.as_slice())?;
        for service in &services {
            store.register_service(service.id, &service.title).await?;
        }
        info!(count = services.len(), path = %path.display(), "service catalog loaded");
    }

    let file = tokio::fs::File::open(&config.input_file).await.map_err(|e| {
        BalanceError::Io {
            message: format!(
                "Failed to open file '{}': {}",
                config.input_file.display(),
                e
            ),
        }
    })?;
    let mut reader = AsyncReader::new(file.compat());

    let mut replayer = Replayer::new(BalanceEngine::new(store));
    let summary = replayer.replay(&mut reader, config.batch_size).await?;
    info!(
        applied = summary.applied,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "replay finished"
    );

    let engine = replayer.engine();
    let balances = engine.store().accounts().await?;
    write_balances_csv(&balances, output)?;

    let report_location = match config.report.request {
        Some(request) => {
            let report = build_report(engine, request).await?;
            let location = ReportWriter::from_config(&config.report)
                .write(&report)
                .await?;
            Some(location)
        }
        None => None,
    };

    Ok(ReplayOutcome {
        summary,
        report_location,
    })
}

async fn build_report<S: Store>(
    engine: &BalanceEngine<S>,
    request: ReportRequest,
) -> Result<Report, BalanceError> {
    match request {
        ReportRequest::Month { year, month } => engine.create_report(month, year).await,
        ReportRequest::CurrentMonth => engine.report_for(ReportPeriod::current()).await,
        ReportRequest::Range(period) => engine.report_for(period).await,
    }
}
