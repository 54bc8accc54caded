use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Polars error: {0}")]
    Polars(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Duplicate column after sanitization: '{original}' and '{other}' both map to '{storage}'")]
    DuplicateColumn {
        original: String,
        other: String,
        storage: String,
    },

    #[error("Unknown aggregate function: {0}")]
    UnknownFunction(String),

    #[error("Unknown comparison operator: {0}")]
    UnknownOperator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<polars::error::PolarsError> for MonitorError {
    fn from(err: polars::error::PolarsError) -> Self {
        MonitorError::Polars(err.to_string())
    }
}

impl From<rusqlite::Error> for MonitorError {
    fn from(err: rusqlite::Error) -> Self {
        MonitorError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
