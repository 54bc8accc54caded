//! Recommendation Queue - moves generation off the ingest path
//!
//! Ingest detects breaches and enqueues them; a single background worker
//! composes the prompt, calls the generator and persists the result. Closing
//! every queue handle lets the worker drain what is left and exit.

use crate::error::{MonitorError, Result};
use crate::trigger::{Breach, RecommendationTrigger};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct BreachJob {
    pub id: Uuid,
    pub breach: Breach,
}

/// What the worker did before it exited
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub recorded: usize,
    pub failed: usize,
}

/// Producer handle for the recommendation worker
#[derive(Clone)]
pub struct RecommendationQueue {
    sender: mpsc::Sender<BreachJob>,
}

impl RecommendationQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(trigger: Arc<RecommendationTrigger>, capacity: usize) -> (Self, JoinHandle<WorkerReport>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(trigger, receiver));
        (Self { sender }, handle)
    }

    /// Queue a breach; waits while the queue is full.
    pub async fn enqueue(&self, breach: Breach) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.sender
            .send(BreachJob { id, breach })
            .await
            .map_err(|_| MonitorError::Execution("Recommendation worker has stopped".to_string()))?;
        Ok(id)
    }
}

async fn run_worker(trigger: Arc<RecommendationTrigger>, mut receiver: mpsc::Receiver<BreachJob>) -> WorkerReport {
    let mut report = WorkerReport::default();

    while let Some(job) = receiver.recv().await {
        let ctx = &job.breach.context;
        match trigger.record_breach(&job.breach).await {
            Ok(rec) => {
                info!(
                    "Job {} recorded recommendation {} for {}.{} ({})",
                    job.id, rec.recommendation_id, ctx.table_name, ctx.column_name, ctx.function
                );
                report.recorded += 1;
            }
            Err(e) => {
                error!(
                    "Job {} failed for {}.{} ({}): {}",
                    job.id, ctx.table_name, ctx.column_name, ctx.function, e
                );
                report.failed += 1;
            }
        }
    }

    info!(
        "Recommendation worker finished: {} recorded, {} failed",
        report.recorded, report.failed
    );
    report
}
