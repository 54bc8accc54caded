pub mod aggregate;
pub mod condition;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod registry;
pub mod sanitize;
pub mod service;
pub mod table;
pub mod trigger;
pub mod worker;

pub use aggregate::{AggregateFunction, AggregateOutcome};
pub use condition::ComparisonOperator;
pub use config::{DispatchMode, GenerationConfig, MonitorConfig};
pub use error::{MonitorError, Result};
pub use llm::{Generator, OllamaGenerator};
pub use registry::{RecommendationLog, SqliteRegistry, ThresholdSource};
pub use service::{current_value, preview_table, IngestReport, IngestService, TablePreview};
pub use table::LoadedTable;
pub use trigger::{RecommendationTrigger, ThresholdOutcome, TriggeredRecommendation};
pub use worker::RecommendationQueue;
