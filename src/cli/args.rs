use crate::config::{AppConfig, Backend, LogConfig, ReportConfig, ReportRequest, StoreConfig};
use crate::core::history::ReportPeriod;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Replay balance operations and print the resulting balances
#[derive(Parser, Debug)]
#[command(name = "user-balance-ledger")]
#[command(
    about = "Replay balance operations against the ledger and print the resulting balances",
    long_about = None
)]
pub struct CliArgs {
    /// Input CSV file path containing operation records
    #[arg(value_name = "INPUT", help = "Path to the operations CSV file")]
    pub input_file: PathBuf,

    /// Service catalog loaded before the replay
    #[arg(
        long = "services",
        value_name = "FILE",
        help = "CSV file with 'id,title' rows for the service catalog"
    )]
    pub services_file: Option<PathBuf>,

    #[arg(
        long = "backend",
        value_name = "BACKEND",
        default_value = "memory",
        help = "Storage backend: 'memory' or 'postgres'"
    )]
    pub backend: Backend,

    #[arg(
        long = "database-url",
        env = "DATABASE_URL",
        value_name = "URL",
        help = "PostgreSQL connection string (postgres backend only)"
    )]
    pub database_url: Option<String>,

    #[arg(
        long = "max-connections",
        value_name = "COUNT",
        help = "Connection pool size (default: twice the CPU cores)"
    )]
    pub max_connections: Option<u32>,

    #[arg(
        long = "lock-timeout-ms",
        value_name = "MILLIS",
        help = "Give up waiting on a row lock after this long (default: wait forever)"
    )]
    pub lock_timeout_ms: Option<u64>,

    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of operations read per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Emit the report of the current month
    #[arg(long = "report", help = "Write the current month's report after the replay")]
    pub report: bool,

    #[arg(long = "report-month", value_name = "MONTH", requires = "report_year")]
    pub report_month: Option<u32>,

    #[arg(long = "report-year", value_name = "YEAR", requires = "report_month")]
    pub report_year: Option<i32>,

    #[arg(long = "report-from", value_name = "YYYY-MM-DD", requires = "report_to")]
    pub report_from: Option<NaiveDate>,

    #[arg(long = "report-to", value_name = "YYYY-MM-DD", requires = "report_from")]
    pub report_to: Option<NaiveDate>,

    #[arg(
        long = "report-dir",
        value_name = "DIR",
        default_value = crate::config::DEFAULT_REPORT_DIR,
        help = "Directory report files are written to"
    )]
    pub report_dir: PathBuf,

    #[arg(
        long = "report-base-url",
        value_name = "URL",
        help = "Prefix of the reported location, e.g. 'localhost:8081/file'"
    )]
    pub report_base_url: Option<String>,

    #[arg(
        long = "log-level",
        value_name = "FILTER",
        default_value = "info",
        help = "Log filter used when RUST_LOG is unset"
    )]
    pub log_level: String,

    #[arg(long = "log-json", help = "Emit logs as JSON lines on stderr")]
    pub log_json: bool,
}

impl CliArgs {
    /// Logging settings, needed before the rest of the config is built
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            json: self.log_json,
        }
    }

    /// Which report the arguments ask for
    ///
    /// An explicit month wins over a date range, which wins over `--report`.
    pub fn report_request(&self) -> Option<ReportRequest> {
        if let (Some(month), Some(year)) = (self.report_month, self.report_year) {
            return Some(ReportRequest::Month { year, month });
        }
        if let (Some(from), Some(to)) = (self.report_from, self.report_to) {
            return Some(ReportRequest::Range(ReportPeriod::range(from, to)));
        }
        self.report.then_some(ReportRequest::CurrentMonth)
    }

    /// Create an AppConfig from CLI arguments
    ///
    /// Values that were not provided take their defaults; zero values fall
    /// back to the defaults with a warning.
    pub fn to_app_config(&self) -> AppConfig {
        let mut store = StoreConfig {
            backend: self.backend,
            database_url: self.database_url.clone(),
            lock_timeout: self
                .lock_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            services_file: self.services_file.clone(),
            ..StoreConfig::default()
        };
        if let Some(max_connections) = self.max_connections {
            store = store.with_max_connections(max_connections);
        }

        let mut config = AppConfig {
            store,
            report: ReportConfig {
                request: self.report_request(),
                dir: self.report_dir.clone(),
                base_url: self.report_base_url.clone(),
            },
            log: self.log_config(),
            ..AppConfig::new(&self.input_file)
        };
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BATCH_SIZE;
    use rstest::rstest;

    #[rstest]
    #[case::default_backend(&["program", "input.csv"], Backend::Memory)]
    #[case::explicit_memory(&["program", "--backend", "memory", "input.csv"], Backend::Memory)]
    #[case::explicit_postgres(&["program", "--backend", "postgres", "input.csv"], Backend::Postgres)]
    fn test_backend_parsing(#[case] args: &[&str], #[case] expected: Backend) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.backend, expected);
    }

    #[rstest]
    #[case::defaults(&["program", "input.csv"], DEFAULT_BATCH_SIZE, None)]
    #[case::custom_batch_size(&["program", "--batch-size", "20", "input.csv"], 20, None)]
    #[case::zero_batch_size(&["program", "--batch-size", "0", "input.csv"], DEFAULT_BATCH_SIZE, None)]
    #[case::lock_timeout(&["program", "--lock-timeout-ms", "250", "input.csv"], DEFAULT_BATCH_SIZE, Some(Duration::from_millis(250)))]
    #[case::zero_lock_timeout(&["program", "--lock-timeout-ms", "0", "input.csv"], DEFAULT_BATCH_SIZE, None)]
    fn test_app_config_conversion(
        #[case] args: &[&str],
        #[case] expected_batch_size: usize,
        #[case] expected_lock_timeout: Option<Duration>,
    ) {
        let config = CliArgs::try_parse_from(args).unwrap().to_app_config();

        assert_eq!(config.input_file, PathBuf::from("input.csv"));
        assert_eq!(config.batch_size, expected_batch_size);
        assert_eq!(config.store.lock_timeout, expected_lock_timeout);
    }

    #[rstest]
    #[case::none(&["program", "input.csv"], None)]
    #[case::current(&["program", "--report", "input.csv"], Some(ReportRequest::CurrentMonth))]
    #[case::month(
        &["program", "--report-month", "10", "--report-year", "2022", "input.csv"],
        Some(ReportRequest::Month { year: 2022, month: 10 })
    )]
    #[case::month_wins(
        &["program", "--report", "--report-month", "3", "--report-year", "2021", "input.csv"],
        Some(ReportRequest::Month { year: 2021, month: 3 })
    )]
    #[case::range(
        &["program", "--report-from", "2022-10-01", "--report-to", "2022-10-15", "input.csv"],
        Some(ReportRequest::Range(ReportPeriod::range(
            NaiveDate::from_ymd_opt(2022, 10, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 10, 15).unwrap(),
        )))
    )]
    fn test_report_request(#[case] args: &[&str], #[case] expected: Option<ReportRequest>) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.report_request(), expected);
    }

    #[test]
    fn test_report_and_log_options() {
        let config = CliArgs::try_parse_from([
            "program",
            "--report-dir",
            "out",
            "--report-base-url",
            "localhost:8081/file",
            "--log-level",
            "debug",
            "--log-json",
            "--services",
            "services.csv",
            "input.csv",
        ])
        .unwrap()
        .to_app_config();

        assert_eq!(config.report.dir, PathBuf::from("out"));
        assert_eq!(config.report.base_url.as_deref(), Some("localhost:8081/file"));
        assert_eq!(config.log, LogConfig { level: "debug".to_string(), json: true });
        assert_eq!(config.store.services_file, Some(PathBuf::from("services.csv")));
    }

    #[rstest]
    #[case::missing_input(&["program"])]
    #[case::invalid_backend(&["program", "--backend", "sqlite", "input.csv"])]
    #[case::month_without_year(&["program", "--report-month", "10", "input.csv"])]
    #[case::bad_date(&["program", "--report-from", "10/01/2022", "--report-to", "2022-10-15", "input.csv"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
