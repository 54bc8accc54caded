//! Loaded Table - in-memory columnar snapshot of one ingested CSV file
//!
//! Columns are stored under their sanitized names; the table keeps the
//! [`ColumnMapping`] built from the original headers so callers can go from a
//! user-facing name to the stored column and back.

use crate::error::{MonitorError, Result};
use crate::sanitize::ColumnMapping;
use polars::prelude::*;
use std::path::Path;

/// Cell contents read as missing values, in addition to empty fields
pub const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN", "<NA>", "N/A",
    "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

pub struct LoadedTable {
    name: String,
    frame: DataFrame,
    mapping: ColumnMapping,
}

/// Read the header row of a CSV file exactly as written.
pub fn read_csv_headers(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path.as_ref())?;

    Ok(reader.headers()?.iter().map(|h| h.to_string()).collect())
}

impl LoadedTable {
    /// Load a CSV file and rename its columns to their storage names.
    pub fn from_csv(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref();

        let headers = read_csv_headers(path)?;
        let mapping = ColumnMapping::from_headers(&headers)?;

        let mut frame = LazyCsvReader::new(path)
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .with_null_values(Some(NullValues::AllColumns(
                MISSING_MARKERS.iter().map(|m| m.to_string()).collect(),
            )))
            .finish()
            .map_err(|e| MonitorError::Execution(format!("Failed to scan CSV {}: {}", path.display(), e)))?
            .collect()
            .map_err(|e| MonitorError::Execution(format!("Failed to collect CSV {}: {}", path.display(), e)))?;

        if frame.width() != mapping.len() {
            return Err(MonitorError::Execution(format!(
                "CSV {} has {} header(s) but {} parsed column(s)",
                path.display(),
                mapping.len(),
                frame.width()
            )));
        }
        frame.set_column_names(&mapping.storage_columns())?;

        Ok(Self { name, frame, mapping })
    }

    /// Wrap a frame whose columns still carry their original names.
    pub fn from_frame(name: impl Into<String>, mut frame: DataFrame) -> Result<Self> {
        let headers: Vec<String> = frame.get_column_names().iter().map(|s| s.to_string()).collect();
        let mapping = ColumnMapping::from_headers(&headers)?;
        frame.set_column_names(&mapping.storage_columns())?;

        Ok(Self {
            name: name.into(),
            frame,
            mapping,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Column by storage name
    pub fn column(&self, storage_name: &str) -> Option<&Series> {
        self.frame.column(storage_name).ok()
    }

    /// Whether a stored column is numeric; `None` if there is no such column
    pub fn is_numeric(&self, storage_name: &str) -> Option<bool> {
        self.column(storage_name).map(|s| s.dtype().is_numeric())
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    /// Storage column names in load order
    pub fn storage_columns(&self) -> Vec<String> {
        self.frame.get_column_names().iter().map(|s| s.to_string()).collect()
    }
}

impl std::fmt::Debug for LoadedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedTable")
            .field("name", &self.name)
            .field("columns", &self.storage_columns())
            .field("rows", &self.row_count())
            .finish()
    }
}
