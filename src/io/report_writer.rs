//! Report file output
//!
//! Writes a [`Report`] as a `title;amount` CSV file and hands back where it
//! can be fetched from.

use crate::config::ReportConfig;
use crate::core::history::Report;
use crate::io::csv_format::write_report_csv;
use crate::types::BalanceError;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    base_url: Option<String>,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(config.dir.clone(), config.base_url.clone())
    }

    /// Write `report` to `<dir>/<period>-<unix millis>.csv`
    ///
    /// The directory is created if missing. An existing file is never
    /// overwritten: on a name clash a `-<n>` suffix is appended.
    ///
    /// # Returns
    ///
    /// `<base_url>/<file name>` when a base URL is configured, otherwise the
    /// path of the written file.
    pub async fn write(&self, report: &Report) -> Result<String, BalanceError> {
        let mut contents = Vec::new();
        write_report_csv(report, &mut contents)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let stem = format!(
            "{}-{}",
            report.period.label(),
            chrono::Utc::now().timestamp_millis()
        );

        let mut attempt = 0u32;
        let (file_name, path, mut file) = loop {
            let file_name = if attempt == 0 {
                format!("{}.csv", stem)
            } else {
                format!("{}-{}.csv", stem, attempt)
            };
            let path = self.dir.join(&file_name);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (file_name, path, file),
                Err(error) if error.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(error) => return Err(error.into()),
            }
        };
        file.write_all(&contents).await?;
        file.flush().await?;

        let location = match &self.base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), file_name),
            None => path.display().to_string(),
        };
        info!(period = %report.period, %location, "report written");
        Ok(location)
    }
}
