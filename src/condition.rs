use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Le => "<=",
        }
    }

    /// True when `current` breaches `threshold`. An absent value never does.
    ///
    /// `=` is exact floating-point equality.
    pub fn evaluate(&self, current: Option<f64>, threshold: f64) -> bool {
        let Some(current) = current else {
            return false;
        };

        match self {
            ComparisonOperator::Gt => current > threshold,
            ComparisonOperator::Lt => current < threshold,
            ComparisonOperator::Eq => current == threshold,
            ComparisonOperator::Ge => current >= threshold,
            ComparisonOperator::Le => current <= threshold,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonOperator {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" => Ok(ComparisonOperator::Gt),
            "<" => Ok(ComparisonOperator::Lt),
            "=" => Ok(ComparisonOperator::Eq),
            ">=" => Ok(ComparisonOperator::Ge),
            "<=" => Ok(ComparisonOperator::Le),
            _ => Err(MonitorError::UnknownOperator(s.to_string())),
        }
    }
}
