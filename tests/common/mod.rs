#![allow(dead_code)]

use async_trait::async_trait;
use metric_sentinel::error::{MonitorError, Result};
use metric_sentinel::registry::{NewRecommendation, NewThreshold, RecommendationLog, SqliteRegistry};
use metric_sentinel::{AggregateFunction, ComparisonOperator, Generator, LoadedTable};
use polars::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Generator that records prompts and answers with a fixed text, failing for
/// prompts that mention `fail_on`.
pub struct StubGenerator {
    pub prompts: Mutex<Vec<String>>,
    reply: String,
    fail_on: Option<String>,
}

impl StubGenerator {
    pub fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: reply.to_string(),
            fail_on: None,
        })
    }

    pub fn failing_on(reply: &str, column: &str) -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            reply: reply.to_string(),
            fail_on: Some(format!("column '{}'", column)),
        })
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.fail_on {
            Some(marker) if prompt.contains(marker.as_str()) => {
                Err(MonitorError::Generation("model crashed".to_string()))
            }
            _ => Ok(self.reply.clone()),
        }
    }
}

/// Recommendation log that refuses every write after the first `allowed`.
pub struct FlakyLog {
    inner: Arc<SqliteRegistry>,
    allowed: usize,
    writes: AtomicUsize,
}

impl FlakyLog {
    pub fn new(inner: Arc<SqliteRegistry>, allowed: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            allowed,
            writes: AtomicUsize::new(0),
        })
    }
}

impl RecommendationLog for FlakyLog {
    fn append(&self, recommendation: &NewRecommendation) -> Result<i64> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(MonitorError::Database("disk I/O error".to_string()));
        }
        self.inner.append(recommendation)
    }
}

/// The `metrics` table used across scenarios
pub fn metrics_frame() -> DataFrame {
    df! [
        "Timestamp" => ["10:00", "10:01", "10:02"],
        "CPU_Usage" => [10.0, 95.0, 20.0],
        "Memory Usage" => [55.0, 60.0, 65.0],
        "Active Processes" => [120i64, 180, 150]
    ]
    .unwrap()
}

pub fn metrics_table() -> LoadedTable {
    LoadedTable::from_frame("metrics", metrics_frame()).unwrap()
}

pub fn registry_with_metrics() -> (Arc<SqliteRegistry>, i64) {
    let registry = Arc::new(SqliteRegistry::open_in_memory().unwrap());
    let headers: Vec<String> = metrics_table().mapping().original_columns().to_vec();
    let (table_id, _) = registry
        .register_table("metrics", "metrics.csv", "uploads/metrics.csv", &headers)
        .unwrap();
    (registry, table_id)
}

pub fn add_threshold(
    registry: &SqliteRegistry,
    table_id: i64,
    column: &str,
    function: AggregateFunction,
    operator: ComparisonOperator,
    value: f64,
) -> i64 {
    registry
        .create_threshold(&NewThreshold {
            table_id,
            column_name: column.to_string(),
            function,
            operator,
            value,
        })
        .unwrap()
}
