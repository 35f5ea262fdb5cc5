//! Recording of processed blocks
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use alloy_primitives::U256;
use tracing::debug;

use crate::{
    errors::BacktestError,
    snapshot::{flatten_row, Snapshot},
};

/// Persists one row per processed block.
pub trait Recorder {
    fn record(&mut self, number: u64, value: U256, state: &dyn Snapshot)
        -> Result<(), BacktestError>;
}

/// Appends rows to a CSV file.
///
/// The header is written only when the file does not exist yet, so reruns against the same path
/// keep appending below the existing rows.
#[derive(Debug, Clone)]
pub struct CsvRecorder {
    path: PathBuf,
}

impl CsvRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Recorder for CsvRecorder {
    fn record(
        &mut self,
        number: u64,
        value: U256,
        state: &dyn Snapshot,
    ) -> Result<(), BacktestError> {
        let row = flatten_row(number, value, state);
        let header = !self.path.exists();
        if let Some(parent) = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if header {
            writer.write_record(row.iter().map(|(name, _)| name))?;
        }
        writer.write_record(row.iter().map(|(_, v)| v))?;
        writer.flush()?;
        debug!(number, path = %self.path.display(), "Recorded row");
        Ok(())
    }
}
