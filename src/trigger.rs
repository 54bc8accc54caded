//! Recommendation Trigger - evaluates a freshly loaded table against its
//! thresholds and turns breaches into persisted recommendations
//!
//! Per threshold: resolve column → aggregate → compare → (on breach) compose
//! prompt → generate → persist. Thresholds are processed one at a time and a
//! failing threshold never stops its siblings. Each recommendation is
//! committed before the next threshold is looked at.

use crate::aggregate::{AggregateFunction, AggregateOutcome};
use crate::condition::ComparisonOperator;
use crate::error::Result;
use crate::llm::{request_failure_message, Generator};
use crate::prompt::{compose_prompt, BreachContext};
use crate::registry::{NewRecommendation, RecommendationLog, Threshold, ThresholdSource};
use crate::table::LoadedTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Summary of one recommendation produced by a breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredRecommendation {
    pub recommendation_id: i64,
    pub threshold_id: i64,
    pub table: String,
    pub column: String,
    pub function: AggregateFunction,
    pub current_value: f64,
    pub threshold_value: f64,
    pub operator: ComparisonOperator,
    pub recommendation: String,
}

/// A detected breach, ready to be turned into a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub threshold_id: i64,
    pub context: BreachContext,
}

/// Why a threshold was not evaluated
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The original column name is not among the table's headers
    ColumnNotMapped(String),
    /// The sanitized column is absent from the loaded data
    ColumnMissing(String),
    NonNumeric(String),
    UnknownFunction(String),
    UnknownOperator(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ColumnNotMapped(c) => write!(f, "column '{}' is not a header of the loaded table", c),
            SkipReason::ColumnMissing(c) => write!(f, "column '{}' not found in loaded data", c),
            SkipReason::NonNumeric(c) => write!(f, "column '{}' is not numeric", c),
            SkipReason::UnknownFunction(func) => write!(f, "unknown function '{}'", func),
            SkipReason::UnknownOperator(op) => write!(f, "unknown operator '{}'", op),
        }
    }
}

/// What happened to one threshold during an evaluation pass
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdOutcome {
    Skipped { threshold_id: i64, reason: SkipReason },
    NotBreached { threshold_id: i64, current_value: Option<f64> },
    Breached(TriggeredRecommendation),
    Failed { threshold_id: i64, error: String },
}

impl ThresholdOutcome {
    pub fn threshold_id(&self) -> i64 {
        match self {
            ThresholdOutcome::Skipped { threshold_id, .. }
            | ThresholdOutcome::NotBreached { threshold_id, .. }
            | ThresholdOutcome::Failed { threshold_id, .. } => *threshold_id,
            ThresholdOutcome::Breached(rec) => rec.threshold_id,
        }
    }
}

enum Evaluation {
    Skip(SkipReason),
    Clear(Option<f64>),
    Breach(Breach),
}

/// Resolve, aggregate and compare one threshold against a loaded table.
///
/// Skippable conditions come back as [`Evaluation::Skip`]; `Err` is reserved
/// for faults while computing the aggregate.
fn evaluate_threshold(threshold: &Threshold, table_name: &str, table: &LoadedTable) -> Result<Evaluation> {
    let function = match threshold.aggregate_function() {
        Ok(f) => f,
        Err(_) => return Ok(Evaluation::Skip(SkipReason::UnknownFunction(threshold.function.clone()))),
    };
    let operator = match threshold.comparison_operator() {
        Ok(op) => op,
        Err(_) => return Ok(Evaluation::Skip(SkipReason::UnknownOperator(threshold.operator.clone()))),
    };

    let Some(storage_name) = table.mapping().storage_name(&threshold.column_name) else {
        return Ok(Evaluation::Skip(SkipReason::ColumnNotMapped(threshold.column_name.clone())));
    };
    let Some(series) = table.column(storage_name) else {
        return Ok(Evaluation::Skip(SkipReason::ColumnMissing(storage_name.to_string())));
    };

    let current = match function.apply(series)? {
        AggregateOutcome::NonNumeric => {
            return Ok(Evaluation::Skip(SkipReason::NonNumeric(threshold.column_name.clone())));
        }
        outcome => outcome.value(),
    };

    if !operator.evaluate(current, threshold.value) {
        return Ok(Evaluation::Clear(current));
    }

    // evaluate() never reports a breach without a value
    let current_value = current.unwrap_or_default();

    Ok(Evaluation::Breach(Breach {
        threshold_id: threshold.id,
        context: BreachContext {
            table_name: table_name.to_string(),
            schema: table.storage_columns(),
            column_name: threshold.column_name.clone(),
            function,
            current_value,
            operator,
            threshold_value: threshold.value,
        },
    }))
}

pub struct RecommendationTrigger {
    thresholds: Arc<dyn ThresholdSource>,
    log: Arc<dyn RecommendationLog>,
    generator: Arc<dyn Generator>,
}

impl RecommendationTrigger {
    pub fn new(
        thresholds: Arc<dyn ThresholdSource>,
        log: Arc<dyn RecommendationLog>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            thresholds,
            log,
            generator,
        }
    }

    /// Evaluate every threshold of a table and record a recommendation for
    /// each breach. Returns the triggered recommendations, possibly none.
    ///
    /// Only a failing recommendation write aborts the pass; recommendations
    /// written before it stay committed.
    pub async fn evaluate_and_trigger(
        &self,
        table_id: i64,
        table_name: &str,
        table: &LoadedTable,
    ) -> Result<Vec<TriggeredRecommendation>> {
        let outcomes = self.evaluate(table_id, table_name, table).await?;

        Ok(outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                ThresholdOutcome::Breached(rec) => Some(rec),
                _ => None,
            })
            .collect())
    }

    /// Same pass as [`RecommendationTrigger::evaluate_and_trigger`], reporting
    /// the outcome of every threshold.
    pub async fn evaluate(&self, table_id: i64, table_name: &str, table: &LoadedTable) -> Result<Vec<ThresholdOutcome>> {
        let thresholds = self.thresholds.thresholds_for(table_id)?;
        debug!("Evaluating {} threshold(s) for table '{}'", thresholds.len(), table_name);

        let mut outcomes = Vec::with_capacity(thresholds.len());

        for threshold in &thresholds {
            let breach = match evaluate_threshold(threshold, table_name, table) {
                Ok(Evaluation::Breach(breach)) => breach,
                Ok(Evaluation::Clear(current_value)) => {
                    debug!(
                        "Threshold {} on {}.{} not breached ({} {:?} {} {})",
                        threshold.id,
                        table_name,
                        threshold.column_name,
                        threshold.function,
                        current_value,
                        threshold.operator,
                        threshold.value
                    );
                    outcomes.push(ThresholdOutcome::NotBreached {
                        threshold_id: threshold.id,
                        current_value,
                    });
                    continue;
                }
                Ok(Evaluation::Skip(reason)) => {
                    warn!(
                        "Skipping threshold {} on {}.{} ({}): {}",
                        threshold.id, table_name, threshold.column_name, threshold.function, reason
                    );
                    outcomes.push(ThresholdOutcome::Skipped {
                        threshold_id: threshold.id,
                        reason,
                    });
                    continue;
                }
                Err(e) => {
                    error!(
                        "Error processing threshold for {}.{} ({}): {}",
                        table_name, threshold.column_name, threshold.function, e
                    );
                    outcomes.push(ThresholdOutcome::Failed {
                        threshold_id: threshold.id,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let text = self.generate(&breach).await;
            let triggered = self.persist(&breach, text)?;
            outcomes.push(ThresholdOutcome::Breached(triggered));
        }

        Ok(outcomes)
    }

    /// Detect breaches without generating anything. Used when recommendations
    /// are produced by a background worker.
    pub fn detect_breaches(&self, table_id: i64, table_name: &str, table: &LoadedTable) -> Result<Vec<Breach>> {
        let thresholds = self.thresholds.thresholds_for(table_id)?;
        let mut breaches = Vec::new();

        for threshold in &thresholds {
            match evaluate_threshold(threshold, table_name, table) {
                Ok(Evaluation::Breach(breach)) => {
                    debug!(
                        "Breach detected for {}.{} ({}): {} {} {}",
                        table_name,
                        threshold.column_name,
                        threshold.function,
                        breach.context.current_value,
                        threshold.operator,
                        threshold.value
                    );
                    breaches.push(breach);
                }
                Ok(Evaluation::Clear(_)) => {}
                Ok(Evaluation::Skip(reason)) => {
                    warn!(
                        "Skipping threshold {} on {}.{} ({}): {}",
                        threshold.id, table_name, threshold.column_name, threshold.function, reason
                    );
                }
                Err(e) => {
                    error!(
                        "Error processing threshold for {}.{} ({}): {}",
                        table_name, threshold.column_name, threshold.function, e
                    );
                }
            }
        }

        Ok(breaches)
    }

    /// Compose, generate and persist the recommendation for one breach.
    pub async fn record_breach(&self, breach: &Breach) -> Result<TriggeredRecommendation> {
        let text = self.generate(breach).await;
        self.persist(breach, text)
    }

    /// Recommendation text for a breach. A generator error becomes the
    /// failure text itself, so the breach is still recorded.
    async fn generate(&self, breach: &Breach) -> String {
        let ctx = &breach.context;
        info!(
            "Threshold breached for {}.{} ({}): {} {} {}",
            ctx.table_name, ctx.column_name, ctx.function, ctx.current_value, ctx.operator, ctx.threshold_value
        );

        let prompt = compose_prompt(ctx);
        match self.generator.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!(
                    "Generation failed for {}.{} ({}): {}",
                    ctx.table_name, ctx.column_name, ctx.function, e
                );
                request_failure_message(&e.to_string())
            }
        }
    }

    fn persist(&self, breach: &Breach, text: String) -> Result<TriggeredRecommendation> {
        let ctx = &breach.context;
        let recommendation_id = self.log.append(&NewRecommendation {
            threshold_id: Some(breach.threshold_id),
            table_name: ctx.table_name.clone(),
            column_name: ctx.column_name.clone(),
            function: ctx.function,
            current_value: ctx.current_value,
            threshold_value: ctx.threshold_value,
            text: text.clone(),
        })?;

        Ok(TriggeredRecommendation {
            recommendation_id,
            threshold_id: breach.threshold_id,
            table: ctx.table_name.clone(),
            column: ctx.column_name.clone(),
            function: ctx.function,
            current_value: ctx.current_value,
            threshold_value: ctx.threshold_value,
            operator: ctx.operator,
            recommendation: text,
        })
    }
}
