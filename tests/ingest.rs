mod common;

use common::*;
use metric_sentinel::registry::Registration;
use metric_sentinel::service::PREVIEW_ROWS;
use metric_sentinel::{
    current_value, preview_table, AggregateFunction, ComparisonOperator, IngestService, MonitorError, RecommendationQueue,
    RecommendationTrigger, SqliteRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const METRICS_CSV: &str = "Timestamp,CPU_Usage,Memory Usage,Active Processes\n\
10:00,10,55,120\n\
10:01,95,60,180\n\
10:02,20,65,150\n";

fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

struct Fixture {
    _dirs: (TempDir, TempDir),
    source_dir: PathBuf,
    upload_dir: PathBuf,
    registry: Arc<SqliteRegistry>,
    generator: Arc<StubGenerator>,
    trigger: Arc<RecommendationTrigger>,
}

impl Fixture {
    fn new() -> Self {
        let sources = TempDir::new().unwrap();
        let uploads = TempDir::new().unwrap();
        let registry = Arc::new(SqliteRegistry::open(uploads.path().join("registry.db")).unwrap());
        let generator = StubGenerator::new("Identify and terminate resource-intensive processes.");
        let trigger = Arc::new(RecommendationTrigger::new(registry.clone(), registry.clone(), generator.clone()));

        Self {
            source_dir: sources.path().to_path_buf(),
            upload_dir: uploads.path().join("uploads"),
            _dirs: (sources, uploads),
            registry,
            generator,
            trigger,
        }
    }

    fn service(&self) -> IngestService {
        IngestService::new(self.registry.clone(), self.trigger.clone(), &self.upload_dir)
    }
}

#[tokio::test]
async fn test_ingest_registers_table() {
    let fx = Fixture::new();
    let source = write_csv(&fx.source_dir, "server-metrics.csv", METRICS_CSV);

    let report = fx.service().ingest_file(&source).await.unwrap();

    assert_eq!(report.table_name, "server_metrics");
    assert_eq!(report.registration, Registration::Created);
    assert_eq!(report.row_count, 3);
    assert_eq!(report.headers, vec!["Timestamp", "CPU_Usage", "Memory Usage", "Active Processes"]);
    assert_eq!(report.message, "File 'server-metrics.csv' uploaded successfully.");
    assert!(report.triggered.is_empty());
    assert!(fx.upload_dir.join("server-metrics.csv").exists());

    let tables = fx.registry.list_tables().unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].id, report.table_id);
    assert_eq!(tables[0].original_filename, "server-metrics.csv");
}

#[tokio::test]
async fn test_non_csv_is_rejected() {
    let fx = Fixture::new();
    let source = write_csv(&fx.source_dir, "metrics.txt", METRICS_CSV);

    let err = fx.service().ingest_file(&source).await.unwrap_err();

    assert!(matches!(err, MonitorError::Input(_)));
    assert!(fx.registry.list_tables().unwrap().is_empty());
}

#[tokio::test]
async fn test_ingest_without_files_is_an_error() {
    let fx = Fixture::new();
    let err = fx.service().ingest_files(&[]).await.unwrap_err();
    assert!(matches!(err, MonitorError::Input(_)));
}

#[tokio::test]
async fn test_colliding_headers_leave_nothing_behind() {
    let fx = Fixture::new();
    let source = write_csv(&fx.source_dir, "bad.csv", "cpu usage,cpu-usage\n1,2\n");

    let err = fx.service().ingest_file(&source).await.unwrap_err();

    assert!(matches!(err, MonitorError::Execution(_)));
    assert!(fx.registry.list_tables().unwrap().is_empty());
    assert!(!fx.upload_dir.join("bad.csv").exists());
    assert!(!fx.upload_dir.join(".bad.csv.incoming").exists());
}

#[tokio::test]
async fn test_failed_reingest_keeps_previous_upload() {
    let fx = Fixture::new();
    let service = fx.service();
    let source = write_csv(&fx.source_dir, "metrics.csv", METRICS_CSV);
    let first = service.ingest_file(&source).await.unwrap();

    write_csv(&fx.source_dir, "metrics.csv", "CPU_Usage,CPU Usage\n1,2\n");
    assert!(service.ingest_file(&source).await.is_err());

    let stored = std::fs::read_to_string(fx.upload_dir.join("metrics.csv")).unwrap();
    assert_eq!(stored, METRICS_CSV);
    assert!(!fx.upload_dir.join(".metrics.csv.incoming").exists());

    let avg = current_value(&fx.registry, first.table_id, "CPU_Usage", "AVG").unwrap();
    assert_eq!(avg.current_value, 41.67);
}

#[tokio::test]
async fn test_reingest_updates_and_triggers() {
    let fx = Fixture::new();
    let service = fx.service();
    let source = write_csv(&fx.source_dir, "metrics.csv", "Timestamp,CPU_Usage\n10:00,10\n10:01,20\n");

    let first = service.ingest_file(&source).await.unwrap();
    add_threshold(&fx.registry, first.table_id, "CPU_Usage", AggregateFunction::Avg, ComparisonOperator::Gt, 40.0);

    write_csv(&fx.source_dir, "metrics.csv", METRICS_CSV);
    let second = service.ingest_file(&source).await.unwrap();

    assert_eq!(second.table_id, first.table_id);
    assert_eq!(second.registration, Registration::Updated);
    assert_eq!(second.message, "File 'metrics.csv' updated successfully.");
    assert_eq!(second.headers.len(), 4);
    assert_eq!(fx.registry.list_tables().unwrap().len(), 1);

    assert_eq!(second.triggered.len(), 1);
    assert!((second.triggered[0].current_value - 41.67).abs() < 0.01);
    assert_eq!(fx.generator.prompt_count(), 1);
    assert_eq!(fx.registry.list_recommendations().unwrap().len(), 1);
}

#[tokio::test]
async fn test_ingest_succeeds_when_every_threshold_fails() {
    let fx = Fixture::new();
    let service = fx.service();
    let source = write_csv(&fx.source_dir, "metrics.csv", METRICS_CSV);
    let first = service.ingest_file(&source).await.unwrap();

    add_threshold(&fx.registry, first.table_id, "Timestamp", AggregateFunction::Avg, ComparisonOperator::Gt, 0.0);
    add_threshold(&fx.registry, first.table_id, "Gone", AggregateFunction::Max, ComparisonOperator::Gt, 0.0);

    let second = service.ingest_file(&source).await.unwrap();

    assert!(second.triggered.is_empty());
    assert_eq!(fx.generator.prompt_count(), 0);
}

#[tokio::test]
async fn test_queued_ingest_hands_breaches_to_worker() {
    let fx = Fixture::new();
    let source = write_csv(&fx.source_dir, "metrics.csv", METRICS_CSV);
    let first = fx.service().ingest_file(&source).await.unwrap();
    add_threshold(&fx.registry, first.table_id, "Active Processes", AggregateFunction::Max, ComparisonOperator::Ge, 180.0);

    let (queue, worker) = RecommendationQueue::spawn(fx.trigger.clone(), 8);
    let mut service = fx.service().with_queue(queue);

    let report = service.ingest_file(&source).await.unwrap();
    assert!(report.triggered.is_empty());
    assert_eq!(report.queued.len(), 1);

    service.close_queue();
    let summary = worker.await.unwrap();
    assert_eq!(summary.recorded, 1);

    let stored = fx.registry.list_recommendations().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].column_name, "Active Processes");
    assert_eq!(stored[0].current_value, Some(180.0));
}

#[tokio::test]
async fn test_current_value_lookup() {
    let fx = Fixture::new();
    let source = write_csv(&fx.source_dir, "metrics.csv", METRICS_CSV);
    let report = fx.service().ingest_file(&source).await.unwrap();

    let avg = current_value(&fx.registry, report.table_id, "CPU_Usage", "avg").unwrap();
    assert_eq!(avg.function, AggregateFunction::Avg);
    assert_eq!(avg.current_value, 41.67);

    let count = current_value(&fx.registry, report.table_id, "Memory Usage", "COUNT").unwrap();
    assert_eq!(count.current_value, 3.0);

    let err = current_value(&fx.registry, report.table_id, "Timestamp", "SUM").unwrap_err();
    assert!(matches!(err, MonitorError::Input(_)));

    let err = current_value(&fx.registry, report.table_id, "Disk", "MAX").unwrap_err();
    assert!(matches!(err, MonitorError::NotFound(_)));

    let err = current_value(&fx.registry, report.table_id, "CPU_Usage", "MEDIAN").unwrap_err();
    assert!(matches!(err, MonitorError::UnknownFunction(_)));

    let err = current_value(&fx.registry, report.table_id + 100, "CPU_Usage", "AVG").unwrap_err();
    assert!(matches!(err, MonitorError::NotFound(_)));
}

#[tokio::test]
async fn test_missing_markers_in_uploaded_file() {
    let fx = Fixture::new();
    let source = write_csv(&fx.source_dir, "gaps.csv", "Host,CPU_Usage\nweb-1,10\nweb-2,NA\nweb-3,null\nweb-4,NaN\nweb-5,20\n");
    let report = fx.service().ingest_file(&source).await.unwrap();
    add_threshold(&fx.registry, report.table_id, "CPU_Usage", AggregateFunction::Avg, ComparisonOperator::Gt, 14.0);

    let avg = current_value(&fx.registry, report.table_id, "CPU_Usage", "AVG").unwrap();
    assert_eq!(avg.current_value, 15.0);
    let count = current_value(&fx.registry, report.table_id, "CPU_Usage", "COUNT").unwrap();
    assert_eq!(count.current_value, 2.0);

    let again = fx.service().ingest_file(&source).await.unwrap();
    assert_eq!(again.triggered.len(), 1);
    assert_eq!(again.triggered[0].current_value, 15.0);
}

#[tokio::test]
async fn test_preview_shows_first_rows() {
    let fx = Fixture::new();
    let mut contents = String::from("Host Name,CPU Usage\n");
    for i in 0..60 {
        contents.push_str(&format!("web-{},{}\n", i, i));
    }
    contents.push_str("web-60,NA\n");
    let source = write_csv(&fx.source_dir, "fleet.csv", &contents);
    let report = fx.service().ingest_file(&source).await.unwrap();

    let preview = preview_table(&fx.registry, report.table_id, PREVIEW_ROWS).unwrap();

    assert_eq!(preview.table_name, "fleet.csv");
    assert_eq!(preview.columns, vec!["Host_Name", "CPU_Usage"]);
    assert_eq!(preview.data.len(), 50);
    assert_eq!(preview.data[0]["Host_Name"], "web-0");
    assert_eq!(preview.data[49]["CPU_Usage"], 49);

    let everything = preview_table(&fx.registry, report.table_id, 100).unwrap();
    assert_eq!(everything.data.len(), 61);
    assert!(everything.data[60]["CPU_Usage"].is_null());

    let err = preview_table(&fx.registry, report.table_id + 1, PREVIEW_ROWS).unwrap_err();
    assert!(matches!(err, MonitorError::NotFound(_)));
}
