//! Application configuration
//!
//! Built once from the command line by `CliArgs::to_app_config` and passed
//! down explicitly; nothing here is global.

use crate::core::history::ReportPeriod;
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Operations read per batch when none is configured
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Directory report files are written to when none is configured
pub const DEFAULT_REPORT_DIR: &str = "file";

/// Storage backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process tables with row locks
    #[default]
    Memory,
    /// PostgreSQL (requires the `postgres` feature)
    Postgres,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Row-lock wait limit; `None` waits indefinitely
    pub lock_timeout: Option<Duration>,
    /// `id,title` CSV loaded into the service catalog at startup
    pub services_file: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            database_url: None,
            max_connections: default_max_connections(),
            lock_timeout: None,
            services_file: None,
        }
    }
}

impl StoreConfig {
    /// Pool size, falling back to the default for zero
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = if max_connections == 0 {
            let default = default_max_connections();
            warn!(
                max_connections,
                default, "invalid max_connections, using default"
            );
            default
        } else {
            max_connections
        };
        self
    }
}

/// Two connections per core
fn default_max_connections() -> u32 {
    u32::try_from(num_cpus::get() * 2).unwrap_or(u32::MAX)
}

/// Which report, if any, to emit after the replay
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportRequest {
    Month { year: i32, month: u32 },
    CurrentMonth,
    Range(ReportPeriod),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReportConfig {
    pub request: Option<ReportRequest>,
    pub dir: PathBuf,
    /// Prefix of the returned report location; the file path is returned
    /// when absent
    pub base_url: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            request: None,
            dir: PathBuf::from(DEFAULT_REPORT_DIR),
            base_url: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything the replay pipeline needs to run
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub input_file: PathBuf,
    pub store: StoreConfig,
    pub report: ReportConfig,
    pub batch_size: usize,
    pub log: LogConfig,
}

impl AppConfig {
    /// Config with defaults for everything but the input file
    pub fn new(input_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            store: StoreConfig::default(),
            report: ReportConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            log: LogConfig::default(),
        }
    }

    /// Batch size, falling back to the default for zero
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = if batch_size == 0 {
            warn!(
                batch_size,
                default = DEFAULT_BATCH_SIZE,
                "invalid batch_size, using default"
            );
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        self
    }
}
