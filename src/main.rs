//! User Balance Ledger CLI
//!
//! Replays balance operations from a CSV file and prints the final balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- operations.csv --services services.csv > balances.csv
//! cargo run -- operations.csv --services services.csv --report-month 10 --report-year 2022
//! cargo run --features postgres -- operations.csv --backend postgres --database-url postgres://...
//! ```
//!
//! Balances go to stdout as `user,balance,reserved`; logs go to stderr.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, storage failure, invalid report period, etc.)

use std::process;
use user_balance_ledger::{cli, logging, replay};

fn main() {
    let args = cli::parse_args();
    logging::init_logging(&args.log_config());
    let config = args.to_app_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };

    let mut output = std::io::stdout();
    match runtime.block_on(replay::run(&config, &mut output)) {
        Ok(outcome) => {
            if let Some(location) = outcome.report_location {
                eprintln!("Report: {}", location);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
