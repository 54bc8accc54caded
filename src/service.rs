//! Ingest Service - loads CSV files, keeps the registry current and hands
//! each loaded table to the recommendation trigger
//!
//! Also hosts the on-demand current-value lookup and the table preview.

use crate::aggregate::{AggregateFunction, AggregateOutcome};
use crate::error::{MonitorError, Result};
use polars::prelude::AnyValue;
use crate::registry::{Registration, SqliteRegistry};
use crate::sanitize::sanitize_identifier;
use crate::table::LoadedTable;
use crate::trigger::{RecommendationTrigger, TriggeredRecommendation};
use crate::worker::RecommendationQueue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of ingesting one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub filename: String,
    pub table_id: i64,
    pub table_name: String,
    pub headers: Vec<String>,
    pub row_count: usize,
    pub registration: Registration,
    pub message: String,
    /// Recommendations produced during ingest (inline dispatch)
    pub triggered: Vec<TriggeredRecommendation>,
    /// Job ids of breaches handed to the worker (queued dispatch)
    pub queued: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentValue {
    pub table_id: i64,
    pub column: String,
    pub function: AggregateFunction,
    pub current_value: f64,
}

/// First rows of a registered table, under storage column names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePreview {
    pub table_id: i64,
    /// Display name: the uploaded file name
    pub table_name: String,
    pub columns: Vec<String>,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
}

pub const PREVIEW_ROWS: usize = 50;

pub struct IngestService {
    registry: Arc<SqliteRegistry>,
    trigger: Arc<RecommendationTrigger>,
    upload_dir: PathBuf,
    queue: Option<RecommendationQueue>,
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl IngestService {
    pub fn new(registry: Arc<SqliteRegistry>, trigger: Arc<RecommendationTrigger>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            trigger,
            upload_dir: upload_dir.into(),
            queue: None,
        }
    }

    /// Hand breaches to a background worker instead of generating inline.
    pub fn with_queue(mut self, queue: RecommendationQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Drop the queue handle so the worker can drain and exit.
    pub fn close_queue(&mut self) {
        self.queue = None;
    }

    pub async fn ingest_files(&self, sources: &[PathBuf]) -> Result<Vec<IngestReport>> {
        if sources.is_empty() {
            return Err(MonitorError::Input("No files given".to_string()));
        }

        let mut reports = Vec::with_capacity(sources.len());
        for source in sources {
            reports.push(self.ingest_file(source).await?);
        }
        Ok(reports)
    }

    /// Store, register and load one CSV file, then evaluate its thresholds.
    ///
    /// Threshold evaluation never fails the ingest: problems there are logged
    /// and surface through the recommendation log.
    pub async fn ingest_file(&self, source: &Path) -> Result<IngestReport> {
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MonitorError::Input(format!("Not a file: {}", source.display())))?
            .to_string();

        if !is_csv(source) {
            return Err(MonitorError::Input(format!("File {} is not a CSV", filename)));
        }

        let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or(&filename);
        let table_name = sanitize_identifier(stem);

        std::fs::create_dir_all(&self.upload_dir)?;
        let stored = self.upload_dir.join(&filename);

        // Content is staged beside the stored file and moved over it only after
        // it has loaded and registered. A failed ingest leaves the stored file
        // untouched.
        let staged = if same_file(source, &stored) {
            None
        } else {
            let staged = self.upload_dir.join(format!(".{}.incoming", filename));
            std::fs::copy(source, &staged)?;
            Some(staged)
        };
        let load_path = staged.as_deref().unwrap_or(&stored);

        let loaded = match self.load_and_register(&filename, &table_name, load_path, &stored) {
            Ok(loaded) => loaded,
            Err(e) => {
                if let Some(staged) = &staged {
                    if let Err(rm) = std::fs::remove_file(staged) {
                        warn!("Failed to remove {} after failed ingest: {}", staged.display(), rm);
                    }
                }
                return Err(MonitorError::Execution(format!("Failed to process file {}: {}", filename, e)));
            }
        };
        if let Some(staged) = &staged {
            std::fs::rename(staged, &stored)?;
        }
        let (table_id, registration, table, headers) = loaded;

        let message = match registration {
            Registration::Created => format!("File '{}' uploaded successfully.", filename),
            Registration::Updated => format!("File '{}' updated successfully.", filename),
        };
        info!(
            "Loaded '{}' into table '{}' ({} rows)",
            filename,
            table_name,
            table.row_count()
        );

        let mut report = IngestReport {
            filename,
            table_id,
            table_name: table_name.clone(),
            headers,
            row_count: table.row_count(),
            registration,
            message,
            triggered: Vec::new(),
            queued: Vec::new(),
        };

        match &self.queue {
            None => match self.trigger.evaluate_and_trigger(table_id, &table_name, &table).await {
                Ok(triggered) => report.triggered = triggered,
                Err(e) => error!("Threshold evaluation for '{}' stopped early: {}", table_name, e),
            },
            Some(queue) => match self.trigger.detect_breaches(table_id, &table_name, &table) {
                Ok(breaches) => {
                    for breach in breaches {
                        match queue.enqueue(breach).await {
                            Ok(job) => report.queued.push(job.to_string()),
                            Err(e) => error!("Failed to queue breach for '{}': {}", table_name, e),
                        }
                    }
                }
                Err(e) => error!("Threshold evaluation for '{}' failed: {}", table_name, e),
            },
        }

        Ok(report)
    }

    fn load_and_register(
        &self,
        filename: &str,
        table_name: &str,
        load_path: &Path,
        stored: &Path,
    ) -> Result<(i64, Registration, LoadedTable, Vec<String>)> {
        let table = LoadedTable::from_csv(table_name, load_path)?;
        let headers = table.mapping().original_columns().to_vec();
        let filepath = stored.to_string_lossy();

        let (table_id, registration) = self
            .registry
            .register_table(table_name, filename, &filepath, &headers)?;

        Ok((table_id, registration, table, headers))
    }
}

fn json_value(value: AnyValue<'_>) -> serde_json::Value {
    use serde_json::Value;

    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int8(v) => Value::from(v),
        AnyValue::Int16(v) => Value::from(v),
        AnyValue::Int32(v) => Value::from(v),
        AnyValue::Int64(v) => Value::from(v),
        AnyValue::UInt8(v) => Value::from(v),
        AnyValue::UInt16(v) => Value::from(v),
        AnyValue::UInt32(v) => Value::from(v),
        AnyValue::UInt64(v) => Value::from(v),
        AnyValue::Float32(v) => serde_json::Number::from_f64(v as f64).map_or(Value::Null, Value::Number),
        AnyValue::Float64(v) => serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number),
        AnyValue::String(v) => Value::String(v.to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Load a registered table and return its first `limit` rows.
pub fn preview_table(registry: &SqliteRegistry, table_id: i64, limit: usize) -> Result<TablePreview> {
    let record = registry
        .lookup_table(table_id)?
        .ok_or_else(|| MonitorError::NotFound(format!("Table {} not found", table_id)))?;

    let table = LoadedTable::from_csv(&record.name, &record.filepath)?;
    let head = table.frame().head(Some(limit));
    let columns = table.storage_columns();

    let mut data = Vec::with_capacity(head.height());
    for row in 0..head.height() {
        let mut object = serde_json::Map::with_capacity(columns.len());
        for series in head.get_columns() {
            object.insert(series.name().to_string(), json_value(series.get(row)?));
        }
        data.push(object);
    }

    Ok(TablePreview {
        table_id,
        table_name: record.original_filename,
        columns,
        data,
    })
}

/// Compute the current value of `function` over a registered table's column,
/// rounded to two decimals.
pub fn current_value(registry: &SqliteRegistry, table_id: i64, column: &str, function: &str) -> Result<CurrentValue> {
    let record = registry
        .lookup_table(table_id)?
        .ok_or_else(|| MonitorError::NotFound(format!("Table {} not found", table_id)))?;

    if !record.headers.iter().any(|h| h == column) {
        return Err(MonitorError::NotFound(format!(
            "Column '{}' not found in table '{}'",
            column, record.original_filename
        )));
    }

    let function: AggregateFunction = function.parse()?;

    let table = LoadedTable::from_csv(&record.name, &record.filepath)?;
    let storage = table.mapping().storage_name(column).ok_or_else(|| {
        MonitorError::NotFound(format!(
            "Column '{}' is no longer present in {}",
            column, record.filepath
        ))
    })?;
    let series = table
        .column(storage)
        .ok_or_else(|| MonitorError::NotFound(format!("Column '{}' not found in loaded data", storage)))?;

    match function.apply(series)? {
        AggregateOutcome::Value(v) => Ok(CurrentValue {
            table_id,
            column: column.to_string(),
            function,
            current_value: (v * 100.0).round() / 100.0,
        }),
        AggregateOutcome::NoValue => Err(MonitorError::NotFound(
            "Could not calculate value (column is empty after filtering)".to_string(),
        )),
        AggregateOutcome::NonNumeric => Err(MonitorError::Input(format!(
            "Column '{}' is not numeric, cannot apply '{}' function",
            column, function
        ))),
    }
}
