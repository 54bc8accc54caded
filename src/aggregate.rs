use crate::error::{MonitorError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregate functions a threshold can be defined over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Avg,
    Max,
    Min,
    Sum,
    Count,
}

/// Result of applying an aggregate to one column
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateOutcome {
    Value(f64),
    /// No non-missing values to aggregate
    NoValue,
    /// Column is not numeric; the aggregate does not apply
    NonNumeric,
}

impl AggregateOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            AggregateOutcome::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Avg,
        AggregateFunction::Max,
        AggregateFunction::Min,
        AggregateFunction::Sum,
        AggregateFunction::Count,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Count => "COUNT",
        }
    }

    /// Apply the aggregate to a column, ignoring missing values. NaN counts
    /// as missing.
    ///
    /// `COUNT` yields the number of non-missing values (zero included); the
    /// other functions yield [`AggregateOutcome::NoValue`] for a column with
    /// nothing left to aggregate.
    pub fn apply(&self, series: &Series) -> Result<AggregateOutcome> {
        if !series.dtype().is_numeric() {
            return Ok(AggregateOutcome::NonNumeric);
        }

        let casted = series
            .cast(&DataType::Float64)
            .map_err(|e| MonitorError::Execution(format!("Failed to cast column '{}' to Float64: {}", series.name(), e)))?;
        let values: Float64Chunked = casted
            .f64()?
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()))
            .collect();

        let present = values.len() - values.null_count();
        if *self == AggregateFunction::Count {
            return Ok(AggregateOutcome::Value(present as f64));
        }
        if present == 0 {
            return Ok(AggregateOutcome::NoValue);
        }

        let result = match self {
            AggregateFunction::Avg => values.mean(),
            AggregateFunction::Max => values.max(),
            AggregateFunction::Min => values.min(),
            AggregateFunction::Sum => values.sum(),
            AggregateFunction::Count => Some(present as f64),
        };

        Ok(result.map(AggregateOutcome::Value).unwrap_or(AggregateOutcome::NoValue))
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateFunction {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVG" => Ok(AggregateFunction::Avg),
            "MAX" => Ok(AggregateFunction::Max),
            "MIN" => Ok(AggregateFunction::Min),
            "SUM" => Ok(AggregateFunction::Sum),
            "COUNT" => Ok(AggregateFunction::Count),
            _ => Err(MonitorError::UnknownFunction(s.to_string())),
        }
    }
}
