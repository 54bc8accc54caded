use metric_sentinel::config::{DispatchMode, MonitorConfig};
use metric_sentinel::registry::NewThreshold;
use metric_sentinel::service::PREVIEW_ROWS;
use metric_sentinel::worker::DEFAULT_QUEUE_CAPACITY;
use metric_sentinel::{
    current_value, preview_table, AggregateFunction, ComparisonOperator, IngestService, OllamaGenerator, RecommendationQueue,
    RecommendationTrigger, SqliteRegistry,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Threshold monitoring with generated recommendations for CSV metrics")]
#[command(version)]
struct Args {
    /// Registry database path (or set SENTINEL_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest CSV files and evaluate their thresholds
    Ingest {
        /// CSV files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Where ingested files are stored (or set SENTINEL_UPLOAD_DIR)
        #[arg(long)]
        upload_dir: Option<PathBuf>,

        /// Generation endpoint (or set SENTINEL_GENERATION_URL)
        #[arg(long)]
        generation_url: Option<String>,

        /// Generation model (or set SENTINEL_GENERATION_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// inline or queued (or set SENTINEL_DISPATCH)
        #[arg(long)]
        dispatch: Option<String>,
    },
    /// List registered tables
    Tables,
    /// Define a threshold on a table column
    AddThreshold {
        #[arg(long)]
        table_id: i64,

        /// Original column name, as in the CSV header
        #[arg(long)]
        column: String,

        /// AVG, MAX, MIN, SUM or COUNT
        #[arg(long)]
        function: String,

        /// One of >, <, =, >=, <=
        #[arg(long)]
        operator: String,

        #[arg(long, allow_hyphen_values = true)]
        value: f64,
    },
    /// List thresholds
    Thresholds,
    /// List recorded recommendations, newest first
    Recommendations,
    /// Show the first rows of a registered table
    Preview {
        #[arg(long)]
        table_id: i64,

        #[arg(long, default_value_t = PREVIEW_ROWS)]
        rows: usize,
    },
    /// Compute the current value of a column aggregate
    CurrentValue {
        #[arg(long)]
        table_id: i64,

        #[arg(long)]
        column: String,

        #[arg(long)]
        function: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = MonitorConfig::from_env()?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let registry = Arc::new(
        SqliteRegistry::open(&config.database_path)
            .with_context(|| format!("Failed to open registry at {}", config.database_path.display()))?,
    );

    match args.command {
        Commands::Ingest {
            files,
            upload_dir,
            generation_url,
            model,
            dispatch,
        } => {
            if let Some(dir) = upload_dir {
                config.upload_dir = dir;
            }
            if let Some(url) = generation_url {
                config.generation.endpoint = url;
            }
            if let Some(model) = model {
                config.generation.model = model;
            }
            if let Some(dispatch) = dispatch {
                config.dispatch = dispatch.parse()?;
            }

            info!(
                "Ingesting {} file(s) with {:?} dispatch via {}",
                files.len(),
                config.dispatch,
                config.generation.endpoint
            );

            let generator = Arc::new(OllamaGenerator::new(config.generation.clone())?);
            let trigger = Arc::new(RecommendationTrigger::new(registry.clone(), registry.clone(), generator));
            let mut service = IngestService::new(registry.clone(), trigger.clone(), &config.upload_dir);

            match config.dispatch {
                DispatchMode::Inline => {
                    let reports = service.ingest_files(&files).await?;
                    print_json(&reports)?;
                }
                DispatchMode::Queued => {
                    let (queue, worker) = RecommendationQueue::spawn(trigger, DEFAULT_QUEUE_CAPACITY);
                    service = service.with_queue(queue);

                    let reports = service.ingest_files(&files).await;
                    service.close_queue();
                    let worker_report = worker.await.context("Recommendation worker panicked")?;

                    print_json(&reports?)?;
                    info!(
                        "Worker recorded {} recommendation(s), {} failed",
                        worker_report.recorded, worker_report.failed
                    );
                }
            }
        }
        Commands::Tables => print_json(&registry.list_tables()?)?,
        Commands::AddThreshold {
            table_id,
            column,
            function,
            operator,
            value,
        } => {
            let function: AggregateFunction = function.parse()?;
            let operator: ComparisonOperator = operator.parse()?;
            let id = registry.create_threshold(&NewThreshold {
                table_id,
                column_name: column,
                function,
                operator,
                value,
            })?;
            info!("Threshold created successfully with id {}", id);
            print_json(&serde_json::json!({ "id": id }))?;
        }
        Commands::Thresholds => print_json(&registry.list_thresholds()?)?,
        Commands::Recommendations => print_json(&registry.list_recommendations()?)?,
        Commands::Preview { table_id, rows } => print_json(&preview_table(&registry, table_id, rows)?)?,
        Commands::CurrentValue {
            table_id,
            column,
            function,
        } => print_json(&current_value(&registry, table_id, &column, &function)?)?,
    }

    Ok(())
}
