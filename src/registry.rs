//! Table Registry - SQLite store for table registrations, thresholds and the
//! recommendation log
//!
//! Every public operation locks the connection for the duration of its own
//! statements only, so no lock is ever held while a recommendation is being
//! generated.

use crate::aggregate::AggregateFunction;
use crate::condition::ComparisonOperator;
use crate::error::{MonitorError, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// A registered (ingested) table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: i64,
    /// Sanitized storage name
    pub name: String,
    /// Display name: the uploaded file name
    pub original_filename: String,
    /// Where the uploaded file is stored
    pub filepath: String,
    /// Original column names in file order
    pub headers: Vec<String>,
    pub uploaded_at: String,
}

/// Threshold as stored. Tags are kept verbatim and parsed at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub id: i64,
    pub table_id: i64,
    /// Original (display) column name
    pub column_name: String,
    pub function: String,
    pub operator: String,
    pub value: f64,
}

impl Threshold {
    pub fn aggregate_function(&self) -> Result<AggregateFunction> {
        self.function.parse()
    }

    pub fn comparison_operator(&self) -> Result<ComparisonOperator> {
        self.operator.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewThreshold {
    pub table_id: i64,
    pub column_name: String,
    pub function: AggregateFunction,
    pub operator: ComparisonOperator,
    pub value: f64,
}

/// Threshold joined with its table's display name, for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdView {
    pub id: i64,
    pub table_name: String,
    pub column_name: String,
    pub function: String,
    pub operator: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecommendation {
    pub threshold_id: Option<i64>,
    pub table_name: String,
    pub column_name: String,
    pub function: AggregateFunction,
    pub current_value: f64,
    pub threshold_value: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub id: i64,
    pub timestamp: String,
    pub threshold_id: Option<i64>,
    pub table_name: String,
    pub column_name: String,
    pub function_name: String,
    pub current_value: Option<f64>,
    pub threshold_value: Option<f64>,
    /// Operator of the originating threshold, if it still exists
    pub threshold_operator: Option<String>,
    pub recommendation_text: String,
}

/// Whether an ingest created a new registration or refreshed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Registration {
    Created,
    Updated,
}

/// Source of threshold definitions for a table
pub trait ThresholdSource: Send + Sync {
    fn thresholds_for(&self, table_id: i64) -> Result<Vec<Threshold>>;
}

/// Append-only sink for triggered recommendations
pub trait RecommendationLog: Send + Sync {
    /// Persist one recommendation and return its id. The write is committed
    /// before this returns.
    fn append(&self, recommendation: &NewRecommendation) -> Result<i64>;
}

pub struct SqliteRegistry {
    db: Mutex<Connection>,
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn table_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
}

fn into_table_record(raw: (i64, String, String, String, String, String)) -> Result<TableRecord> {
    let (id, name, original_filename, filepath, headers, uploaded_at) = raw;
    let headers: Vec<String> = serde_json::from_str(&headers)?;
    Ok(TableRecord {
        id,
        name,
        original_filename,
        filepath,
        headers,
        uploaded_at,
    })
}

impl SqliteRegistry {
    /// Open (or create) the registry database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Connection::open(path)
            .map_err(|e| MonitorError::Database(format!("Failed to open database {}: {}", path.display(), e)))?;
        let registry = Self { db: Mutex::new(db) };
        registry.init_schema()?;

        info!("Opened registry at {}", path.display());
        Ok(registry)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        let registry = Self { db: Mutex::new(db) };
        registry.init_schema()?;
        Ok(registry)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| MonitorError::Database("Registry connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;

        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tables (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                original_filename TEXT NOT NULL,
                filepath TEXT NOT NULL,
                headers TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS thresholds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_id INTEGER NOT NULL,
                column_name TEXT NOT NULL,
                function TEXT NOT NULL,
                operator TEXT NOT NULL,
                value REAL NOT NULL,
                FOREIGN KEY (table_id) REFERENCES tables (id),
                UNIQUE (table_id, column_name, function)
            );

            CREATE TABLE IF NOT EXISTS recommendations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                threshold_id INTEGER,
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                function_name TEXT NOT NULL,
                current_value REAL,
                threshold_value REAL,
                recommendation_text TEXT NOT NULL,
                FOREIGN KEY (threshold_id) REFERENCES thresholds (id)
            );

            CREATE INDEX IF NOT EXISTS idx_thresholds_table ON thresholds(table_id);
            "#,
        )
        .map_err(|e| MonitorError::Database(format!("Failed to create schema: {}", e)))?;

        Ok(())
    }

    /// Register a freshly ingested file, or refresh the registration of a file
    /// with the same display name.
    pub fn register_table(
        &self,
        name: &str,
        original_filename: &str,
        filepath: &str,
        headers: &[String],
    ) -> Result<(i64, Registration)> {
        let headers_json = serde_json::to_string(headers)?;
        let uploaded_at = now_timestamp();

        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM tables WHERE original_filename = ?1",
                params![original_filename],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match existing {
            Some(id) => tx
                .execute(
                    "UPDATE tables SET name = ?1, filepath = ?2, headers = ?3, uploaded_at = ?4 WHERE id = ?5",
                    params![name, filepath, headers_json, uploaded_at, id],
                )
                .map(|_| (id, Registration::Updated)),
            None => tx
                .execute(
                    "INSERT INTO tables (name, original_filename, filepath, headers, uploaded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![name, original_filename, filepath, headers_json, uploaded_at],
                )
                .map(|_| (tx.last_insert_rowid(), Registration::Created)),
        };

        let outcome = outcome.map_err(|e| {
            if is_constraint_violation(&e) {
                MonitorError::Conflict(format!(
                    "Table name '{}' is already used by a different file than '{}'",
                    name, original_filename
                ))
            } else {
                MonitorError::Database(format!("Failed to register table '{}': {}", name, e))
            }
        })?;

        tx.commit()?;
        Ok(outcome)
    }

    pub fn lookup_table(&self, table_id: i64) -> Result<Option<TableRecord>> {
        let db = self.conn()?;
        let raw = db
            .query_row(
                "SELECT id, name, original_filename, filepath, headers, uploaded_at FROM tables WHERE id = ?1",
                params![table_id],
                table_from_row,
            )
            .optional()?;

        raw.map(into_table_record).transpose()
    }

    /// Registered tables, most recently uploaded first
    pub fn list_tables(&self) -> Result<Vec<TableRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, name, original_filename, filepath, headers, uploaded_at FROM tables ORDER BY uploaded_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], table_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(into_table_record).collect()
    }

    /// Create a threshold. At most one threshold exists per
    /// (table, column, function).
    pub fn create_threshold(&self, threshold: &NewThreshold) -> Result<i64> {
        if !threshold.value.is_finite() {
            return Err(MonitorError::Input(format!(
                "Threshold value must be a finite number, got {}",
                threshold.value
            )));
        }
        if threshold.column_name.is_empty() {
            return Err(MonitorError::Input("Threshold column name is required".to_string()));
        }

        let db = self.conn()?;

        let table_exists: Option<i64> = db
            .query_row(
                "SELECT id FROM tables WHERE id = ?1",
                params![threshold.table_id],
                |row| row.get(0),
            )
            .optional()?;
        if table_exists.is_none() {
            return Err(MonitorError::NotFound(format!("Table {} not found", threshold.table_id)));
        }

        db.execute(
            "INSERT INTO thresholds (table_id, column_name, function, operator, value) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                threshold.table_id,
                threshold.column_name,
                threshold.function.as_str(),
                threshold.operator.as_str(),
                threshold.value
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                MonitorError::Conflict(
                    "A threshold already exists for this column with this function in this table.".to_string(),
                )
            } else {
                MonitorError::Database(format!("Failed to create threshold: {}", e))
            }
        })?;

        Ok(db.last_insert_rowid())
    }

    /// All thresholds with their table's display name, ordered by table then column
    pub fn list_thresholds(&self) -> Result<Vec<ThresholdView>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT t.id, tab.original_filename, t.column_name, t.function, t.operator, t.value
            FROM thresholds t
            JOIN tables tab ON t.table_id = tab.id
            ORDER BY tab.name, t.column_name, t.function
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ThresholdView {
                    id: row.get(0)?,
                    table_name: row.get(1)?,
                    column_name: row.get(2)?,
                    function: row.get(3)?,
                    operator: row.get(4)?,
                    value: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Recommendation log, newest first
    pub fn list_recommendations(&self) -> Result<Vec<RecommendationRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT r.id, r.timestamp, r.threshold_id, r.table_name, r.column_name, r.function_name,
                   r.current_value, r.threshold_value, thr.operator, r.recommendation_text
            FROM recommendations r
            LEFT JOIN thresholds thr ON r.threshold_id = thr.id
            ORDER BY r.timestamp DESC, r.id DESC
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RecommendationRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    threshold_id: row.get(2)?,
                    table_name: row.get(3)?,
                    column_name: row.get(4)?,
                    function_name: row.get(5)?,
                    current_value: row.get(6)?,
                    threshold_value: row.get(7)?,
                    threshold_operator: row.get(8)?,
                    recommendation_text: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }
}

impl ThresholdSource for SqliteRegistry {
    fn thresholds_for(&self, table_id: i64) -> Result<Vec<Threshold>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT id, table_id, column_name, function, operator, value
            FROM thresholds
            WHERE table_id = ?1
            ORDER BY column_name, function, id
            "#,
        )?;

        let rows = stmt
            .query_map(params![table_id], |row| {
                Ok(Threshold {
                    id: row.get(0)?,
                    table_id: row.get(1)?,
                    column_name: row.get(2)?,
                    function: row.get(3)?,
                    operator: row.get(4)?,
                    value: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }
}

impl RecommendationLog for SqliteRegistry {
    fn append(&self, recommendation: &NewRecommendation) -> Result<i64> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO recommendations
                (timestamp, threshold_id, table_name, column_name, function_name,
                 current_value, threshold_value, recommendation_text)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                now_timestamp(),
                recommendation.threshold_id,
                recommendation.table_name,
                recommendation.column_name,
                recommendation.function.as_str(),
                recommendation.current_value,
                recommendation.threshold_value,
                recommendation.text
            ],
        )
        .map_err(|e| MonitorError::Database(format!("Failed to record recommendation: {}", e)))?;

        Ok(db.last_insert_rowid())
    }
}
