//! Background progression of a single operation through its stages.
//!
//! One task is spawned per created operation. It moves the record to
//! `processing`, runs each stage of the [`ProgressionPlan`] through a
//! [`StageExecutor`], and finishes with `completed` (or `failed` if a stage
//! errors). The registry lock is only held to check and write state; stage
//! work runs with the lock released, so a concurrent cancel always lands
//! between two checkpoints and is never overwritten.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use intelgate_core::{Operation, OperationStatus};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::Shared;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A named step with the progress percentage reached when it finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub delay: Duration,
    pub progress: u8,
}

impl Stage {
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration, progress: u8) -> Self {
        Self {
            name: name.into(),
            delay,
            progress,
        }
    }
}

/// Ordered stage list driven for every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionPlan {
    stages: Vec<Stage>,
}

impl ProgressionPlan {
    /// Builds a plan, sorting stages by progress so percentages only grow.
    #[must_use]
    pub fn new(mut stages: Vec<Stage>) -> Self {
        stages.sort_by_key(|stage| stage.progress);
        Self { stages }
    }

    /// The default five-stage plan with every delay multiplied by `scale`.
    ///
    /// A scale of `0.0` produces a plan that completes without sleeping.
    #[must_use]
    pub fn scaled(scale: f64) -> Self {
        let scale = if scale.is_finite() { scale.max(0.0) } else { 1.0 };
        let stage = |name: &str, secs: u64, progress| {
            Stage::new(name, Duration::from_secs(secs).mul_f64(scale), progress)
        };
        Self::new(vec![
            stage("Initializing", 2, 10),
            stage("Crawling", 8, 30),
            stage("Footprint analysis", 6, 60),
            stage("Pattern recognition", 4, 80),
            stage("Final correlation", 2, 100),
        ])
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sum of all stage delays.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.stages.iter().map(|stage| stage.delay).sum()
    }
}

impl Default for ProgressionPlan {
    fn default() -> Self {
        Self::scaled(1.0)
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Performs the work behind each stage.
///
/// `execute` receives a snapshot of the record taken when processing started;
/// it must not assume the live record is unchanged. Returning `Err` fails the
/// operation with that message.
#[async_trait]
pub trait StageExecutor: Send + Sync + 'static {
    async fn execute(&self, operation: &Operation, stage: &Stage) -> Result<(), String>;

    /// Result payload stored on successful completion.
    fn results(&self, operation: &Operation) -> Value;
}

/// Placeholder executor: sleeps for each stage's delay and reports fixed findings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExecutor;

#[async_trait]
impl StageExecutor for SimulatedExecutor {
    async fn execute(&self, _operation: &Operation, stage: &Stage) -> Result<(), String> {
        if !stage.delay.is_zero() {
            tokio::time::sleep(stage.delay).await;
        }
        Ok(())
    }

    fn results(&self, operation: &Operation) -> Value {
        json!({
            "target": operation.target,
            "platforms_checked": 15,
            "findings_count": 23,
            "risk_score": 0.72,
            "pattern_type": "professional_account",
            "confidence": 0.88,
        })
    }
}

// ---------------------------------------------------------------------------
// Routine
// ---------------------------------------------------------------------------

/// Drives one operation from `pending` to a terminal state.
pub(super) async fn run(shared: Arc<Shared>, id: String) {
    let snapshot = {
        let mut table = shared.table.write();
        let Some(op) = table.get_mut(&id) else {
            return;
        };
        if op.start(shared.clock.now()).is_err() {
            debug!(operation_id = %id, status = %op.status, "operation left pending before start");
            return;
        }
        op.clone()
    };
    debug!(operation_id = %id, "processing started");

    for stage in shared.plan.stages() {
        if !still_processing(&shared, &id) {
            debug!(operation_id = %id, stage = %stage.name, "abandoning progression");
            return;
        }

        if let Err(reason) = shared.executor.execute(&snapshot, stage).await {
            let mut table = shared.table.write();
            if let Some(op) = table.get_mut(&id) {
                if op.fail(shared.clock.now(), reason.clone()).is_ok() {
                    warn!(operation_id = %id, stage = %stage.name, %reason, "operation failed");
                    metrics::counter!("intelgate_operations_finished_total", "status" => "failed")
                        .increment(1);
                }
            }
            return;
        }

        let mut table = shared.table.write();
        let Some(op) = table.get_mut(&id) else {
            return;
        };
        if op.advance(&stage.name, stage.progress).is_err() {
            debug!(operation_id = %id, status = %op.status, "stopped at stage boundary");
            return;
        }
        debug!(operation_id = %id, stage = %stage.name, progress = stage.progress, "stage done");
    }

    let results = shared.executor.results(&snapshot);
    let mut table = shared.table.write();
    let Some(op) = table.get_mut(&id) else {
        return;
    };
    if op.complete(shared.clock.now(), results).is_ok() {
        info!(
            operation_id = %id,
            duration = op.duration.as_deref().unwrap_or_default(),
            "operation completed"
        );
        metrics::counter!("intelgate_operations_finished_total", "status" => "completed")
            .increment(1);
    }
}

fn still_processing(shared: &Shared, id: &str) -> bool {
    shared
        .table
        .read()
        .get(id)
        .is_some_and(|op| op.status == OperationStatus::Processing)
}
