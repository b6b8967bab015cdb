use crate::errors::ErrorKind;
use crate::models::{ErrorRecord, ERROR_HEADER};
use crate::services::atomic_writer;
use crate::utils::format_timestamp;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::path::{Path, PathBuf};

/// Collects structured failures for one run; written once by [`ErrorReporter::flush`].
pub struct ErrorReporter {
    path: PathBuf,
    run_timestamp: String,
    records: Vec<ErrorRecord>,
}

impl ErrorReporter {
    pub fn new(path: &Path, run_started: DateTime<Utc>) -> Self {
        Self {
            path: path.to_path_buf(),
            run_timestamp: format_timestamp(run_started),
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: ErrorKind, channel_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        match channel_id {
            Some(id) => warn!("[{kind}] {id}: {message}"),
            None => warn!("[{kind}] {message}"),
        }
        self.records.push(ErrorRecord {
            timestamp: self.run_timestamp.clone(),
            channel_id: channel_id.map(str::to_string),
            kind,
            message,
        });
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Write every record to the run's error file. An empty file (header only)
    /// marks a clean run.
    pub fn flush(self) -> Result<PathBuf> {
        atomic_writer::write_csv(&self.path, &ERROR_HEADER, &self.records)?;
        info!(
            "Wrote {} error records to {}",
            self.records.len(),
            self.path.display()
        );
        Ok(self.path)
    }

    /// Flush at the end of a run and pass its outcome through. A failed run
    /// gets a trailing fatal record; its data outputs were never committed.
    pub fn finish<T>(mut self, outcome: Result<T>) -> Result<(T, usize, PathBuf)> {
        match outcome {
            Ok(value) => {
                let count = self.len();
                let path = self.flush()?;
                Ok((value, count, path))
            }
            Err(e) => {
                self.record(ErrorKind::Fatal, None, format!("{e:#}"));
                if let Err(flush_error) = self.flush() {
                    error!("Failed to write error report: {flush_error:#}");
                }
                Err(e)
            }
        }
    }
}
