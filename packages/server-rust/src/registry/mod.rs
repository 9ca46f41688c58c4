//! In-memory operation registry.
//!
//! Owns every [`Operation`] record behind a single `parking_lot::RwLock`.
//! Each public call performs its lookup and mutation inside one lock scope,
//! so readers never observe a half-applied transition. Callers only ever
//! receive clones of stored records.

pub mod progression;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use intelgate_core::{
    ClockSource, IdGenerator, Operation, OperationStatus, Priority, CANCELLED_BY_CALLER,
};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

pub use progression::{ProgressionPlan, SimulatedExecutor, Stage, StageExecutor};

/// Default number of operations returned by [`OperationRegistry::list`].
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound on [`OperationRegistry::list`] results; larger limits are clamped.
pub const MAX_LIST_LIMIT: usize = 1000;

/// Retention age used when a prune request does not name one (30 days).
pub const DEFAULT_RETENTION: &str = "720h";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),
    #[error("Operation not found")]
    NotFound { id: String },
}

// ---------------------------------------------------------------------------
// Query / result types
// ---------------------------------------------------------------------------

/// Filters for [`OperationRegistry::list`]. `None` matches everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<OperationStatus>,
    pub priority: Option<Priority>,
    pub limit: Option<i64>,
}

/// Result of [`OperationRegistry::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    /// Matching operations, newest first, at most `limit` of them.
    pub operations: Vec<Operation>,
    /// Number of matching operations before truncation.
    pub total: usize,
    /// Effective limit after defaulting and clamping.
    pub limit: usize,
}

/// Point-in-time counters over the whole table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_operations: usize,
    pub pending_operations: usize,
    pub processing_operations: usize,
    pub completed_operations: usize,
    pub failed_operations: usize,
    pub cancelled_operations: usize,
    /// `completed / (completed + failed + cancelled)`, `0.0` when nothing finished.
    pub success_rate: f64,
    /// Mean `completed_at - started_at` over completed operations, in milliseconds.
    pub average_duration_ms: u64,
    /// `average_duration_ms` rendered for humans.
    pub average_duration: String,
    pub timestamp: u64,
}

/// Result of a prune pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub deleted_count: usize,
    pub remaining_operations: usize,
    /// Records created before this Unix-millisecond instant were eligible.
    pub cutoff_time: u64,
    /// Age threshold the pass ran with.
    #[serde(skip)]
    pub max_age: Duration,
}

/// Clamps a caller-supplied list limit into `1..=MAX_LIST_LIMIT`.
///
/// Missing, zero and negative limits fall back to [`DEFAULT_LIST_LIMIT`].
#[must_use]
pub fn normalize_limit(limit: Option<i64>) -> usize {
    match limit {
        Some(n) if n > 0 => usize::try_from(n).map_or(MAX_LIST_LIMIT, |n| n.min(MAX_LIST_LIMIT)),
        _ => DEFAULT_LIST_LIMIT,
    }
}

/// Parses a retention age such as `720h`, `90m` or `1h 30m`.
///
/// # Errors
///
/// Returns [`RegistryError::Validation`] if the string is not a valid duration.
pub fn parse_max_age(raw: &str) -> Result<Duration, RegistryError> {
    humantime::parse_duration(raw.trim())
        .map_err(|err| RegistryError::Validation(format!("Invalid duration format: {err}")))
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Registry tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Multiplier applied to every default stage delay; `0.0` disables sleeping.
    pub stage_delay_scale: f64,
    /// Terminal operations older than this are removed by the retention worker.
    pub retention_max_age: Duration,
    /// How often the retention worker runs; `None` disables it.
    pub retention_interval: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stage_delay_scale: 1.0,
            retention_max_age: Duration::from_secs(720 * 3600),
            retention_interval: Some(Duration::from_secs(3600)),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// State shared between the registry handle and progression tasks.
pub(crate) struct Shared {
    pub(crate) table: RwLock<HashMap<String, Operation>>,
    pub(crate) clock: Arc<dyn ClockSource>,
    pub(crate) plan: ProgressionPlan,
    pub(crate) executor: Arc<dyn StageExecutor>,
}

/// Concurrency-safe store of operations.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct OperationRegistry {
    shared: Arc<Shared>,
    ids: IdGenerator,
}

impl OperationRegistry {
    /// Creates a registry that runs operations through `plan` with the
    /// placeholder [`SimulatedExecutor`].
    #[must_use]
    pub fn new(plan: ProgressionPlan, clock: Arc<dyn ClockSource>) -> Self {
        Self::with_executor(plan, Arc::new(SimulatedExecutor), clock)
    }

    /// Creates a registry whose default plan is scaled per `config`.
    #[must_use]
    pub fn from_config(config: &RegistryConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self::new(ProgressionPlan::scaled(config.stage_delay_scale), clock)
    }

    /// Creates a registry with a custom stage executor.
    #[must_use]
    pub fn with_executor(
        plan: ProgressionPlan,
        executor: Arc<dyn StageExecutor>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            ids: IdGenerator::new(Arc::clone(&clock)),
            shared: Arc::new(Shared {
                table: RwLock::new(HashMap::new()),
                clock,
                plan,
                executor,
            }),
        }
    }

    /// Registers a new `pending` operation and starts its progression task.
    ///
    /// Must be called from within a tokio runtime. Returns immediately with
    /// the newly stored record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Validation`] for a blank target or an
    /// unknown priority.
    pub fn create(&self, target: &str, priority: Option<&str>) -> Result<Operation, RegistryError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(RegistryError::Validation("Target is required".to_string()));
        }
        let priority =
            Priority::parse_or_default(priority).map_err(|e| RegistryError::Validation(e.to_string()))?;

        let operation = {
            let mut table = self.shared.table.write();
            let mut id = self.ids.new_id();
            while table.contains_key(&id) {
                id = self.ids.new_id();
            }
            let op = Operation::new(id.clone(), target.to_string(), priority, self.shared.clock.now());
            table.insert(id, op.clone());
            op
        };

        info!(operation_id = %operation.id, target = %operation.target, priority = %priority, "operation created");
        metrics::counter!("intelgate_operations_created_total").increment(1);

        tokio::spawn(progression::run(Arc::clone(&self.shared), operation.id.clone()));
        Ok(operation)
    }

    /// Returns a snapshot of one operation.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no record has that id.
    pub fn get(&self, id: &str) -> Result<Operation, RegistryError> {
        self.shared
            .table
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Lists operations matching every provided filter, newest first.
    #[must_use]
    pub fn list(&self, query: ListQuery) -> ListPage {
        let limit = normalize_limit(query.limit);

        let mut matches: Vec<Operation> = {
            let table = self.shared.table.read();
            table
                .values()
                .filter(|op| query.status.is_none_or(|s| op.status == s))
                .filter(|op| query.priority.is_none_or(|p| op.priority == p))
                .cloned()
                .collect()
        };

        matches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let total = matches.len();
        matches.truncate(limit);

        ListPage {
            operations: matches,
            total,
            limit,
        }
    }

    /// Cancels a `pending` or `processing` operation.
    ///
    /// Cancelling an operation that already reached a terminal state is a
    /// no-op that returns the record unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no record has that id.
    pub fn cancel(&self, id: &str) -> Result<Operation, RegistryError> {
        let mut table = self.shared.table.write();
        let op = table
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;

        if op.cancel(self.shared.clock.now(), CANCELLED_BY_CALLER) {
            info!(operation_id = %id, "operation cancelled");
            metrics::counter!("intelgate_operations_finished_total", "status" => "cancelled")
                .increment(1);
        } else {
            debug!(operation_id = %id, status = %op.status, "cancel ignored for terminal operation");
        }
        Ok(op.clone())
    }

    /// Counts operations per status in a single read of the table.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> StatsSnapshot {
        let mut counts: HashMap<OperationStatus, usize> = HashMap::new();
        let mut total_duration_ms: u64 = 0;
        let mut timed = 0u64;

        let total = {
            let table = self.shared.table.read();
            for op in table.values() {
                *counts.entry(op.status).or_default() += 1;
                if op.status == OperationStatus::Completed {
                    if let Some(elapsed) = op.elapsed() {
                        total_duration_ms = total_duration_ms
                            .saturating_add(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
                        timed += 1;
                    }
                }
            }
            table.len()
        };

        let count = |status: OperationStatus| counts.get(&status).copied().unwrap_or(0);
        let completed = count(OperationStatus::Completed);
        let failed = count(OperationStatus::Failed);
        let cancelled = count(OperationStatus::Cancelled);

        let finished = completed + failed + cancelled;
        let success_rate = if finished == 0 {
            0.0
        } else {
            completed as f64 / finished as f64
        };
        let average_duration_ms = total_duration_ms.checked_div(timed).unwrap_or(0);

        StatsSnapshot {
            total_operations: total,
            pending_operations: count(OperationStatus::Pending),
            processing_operations: count(OperationStatus::Processing),
            completed_operations: completed,
            failed_operations: failed,
            cancelled_operations: cancelled,
            success_rate,
            average_duration_ms,
            average_duration: humantime::format_duration(Duration::from_millis(average_duration_ms))
                .to_string(),
            timestamp: self.shared.clock.now(),
        }
    }

    /// Removes terminal operations older than a duration string (e.g. `720h`).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Validation`] on a malformed duration.
    pub fn prune(&self, max_age: &str) -> Result<PruneReport, RegistryError> {
        let max_age = parse_max_age(max_age)?;
        Ok(self.prune_older_than(max_age))
    }

    /// Removes terminal operations created more than `max_age` ago.
    ///
    /// `pending` and `processing` operations are kept regardless of age.
    pub fn prune_older_than(&self, max_age: Duration) -> PruneReport {
        let age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let cutoff_time = self.shared.clock.now().saturating_sub(age_ms);

        let (deleted_count, remaining_operations) = {
            let mut table = self.shared.table.write();
            let before = table.len();
            table.retain(|_, op| !(op.is_terminal() && op.created_at < cutoff_time));
            (before - table.len(), table.len())
        };

        if deleted_count > 0 {
            info!(deleted_count, remaining_operations, "pruned finished operations");
            metrics::counter!("intelgate_operations_pruned_total")
                .increment(u64::try_from(deleted_count).unwrap_or(u64::MAX));
        }

        PruneReport {
            deleted_count,
            remaining_operations,
            cutoff_time,
            max_age,
        }
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.table.read().len()
    }

    /// Returns `true` if the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.table.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, op: Operation) {
        self.shared.table.write().insert(op.id.clone(), op);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use intelgate_core::{ManualClock, SystemClock};
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use super::*;

    const HOUR: u64 = 3_600_000;

    /// Plan whose stages never finish, so operations stay where the test puts them.
    fn frozen_plan() -> ProgressionPlan {
        ProgressionPlan::new(vec![Stage::new("hold", Duration::from_secs(3_600), 50)])
    }

    fn fast_plan() -> ProgressionPlan {
        ProgressionPlan::new(vec![
            Stage::new("one", Duration::from_millis(5), 40),
            Stage::new("two", Duration::from_millis(5), 100),
        ])
    }

    fn finished(id: &str, status: OperationStatus, priority: Priority, created_at: u64) -> Operation {
        let mut op = Operation::new(id.into(), "t".into(), priority, created_at);
        op.start(created_at).unwrap();
        match status {
            OperationStatus::Completed => op.complete(created_at + 1_000, json!({})).unwrap(),
            OperationStatus::Failed => op.fail(created_at + 1_000, "x").unwrap(),
            OperationStatus::Cancelled => assert!(op.cancel(created_at + 1_000, "x")),
            OperationStatus::Processing => {}
            OperationStatus::Pending => unreachable!("pending records are built with Operation::new"),
        }
        op
    }

    async fn wait_for(registry: &OperationRegistry, id: &str, status: OperationStatus) -> Operation {
        for _ in 0..400 {
            let op = registry.get(id).unwrap();
            if op.status == status {
                return op;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("operation {id} never reached {status}");
    }

    struct FailingExecutor {
        fail_on: &'static str,
    }

    #[async_trait]
    impl StageExecutor for FailingExecutor {
        async fn execute(&self, _op: &Operation, stage: &Stage) -> Result<(), String> {
            if stage.name == self.fail_on {
                Err(format!("{} crashed", stage.name))
            } else {
                Ok(())
            }
        }

        fn results(&self, _op: &Operation) -> Value {
            json!({})
        }
    }

    /// Blocks the first stage until released, counting entries.
    struct GatedExecutor {
        gate: tokio::sync::Notify,
        entered: AtomicUsize,
    }

    #[async_trait]
    impl StageExecutor for GatedExecutor {
        async fn execute(&self, _op: &Operation, _stage: &Stage) -> Result<(), String> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(())
        }

        fn results(&self, _op: &Operation) -> Value {
            json!({"ok": true})
        }
    }

    #[tokio::test]
    async fn create_returns_pending_record_with_unique_id() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(SystemClock));
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let op = registry.create("acme.com", None).unwrap();
            assert_eq!(op.status, OperationStatus::Pending);
            assert_eq!(op.progress, 0);
            assert_eq!(op.priority, Priority::Medium);
            assert!(seen.insert(op.id));
        }
        assert_eq!(registry.len(), 50);
    }

    #[tokio::test]
    async fn create_rejects_blank_target_and_unknown_priority() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(SystemClock));
        assert_eq!(
            registry.create("   ", None),
            Err(RegistryError::Validation("Target is required".into()))
        );
        assert!(matches!(
            registry.create("acme.com", Some("urgent")),
            Err(RegistryError::Validation(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(SystemClock));
        assert_eq!(
            registry.get("op_0_nope00"),
            Err(RegistryError::NotFound { id: "op_0_nope00".into() })
        );
    }

    #[tokio::test]
    async fn operation_runs_to_completion() {
        let registry = OperationRegistry::new(fast_plan(), Arc::new(SystemClock));
        let created = registry.create("acme.com", Some("high")).unwrap();
        assert_eq!(registry.get(&created.id).unwrap().status, OperationStatus::Pending);

        let done = wait_for(&registry, &created.id, OperationStatus::Completed).await;
        assert_eq!(done.progress, 100);
        assert!(done.results.as_ref().is_some_and(|r| !r.is_null()));
        assert!(done.duration.is_some());
        assert!(done.started_at.unwrap() <= done.completed_at.unwrap());
        assert_eq!(done.findings_count, Some(23));
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn processing_always_has_started_at() {
        let registry = OperationRegistry::new(fast_plan(), Arc::new(SystemClock));
        let id = registry.create("acme.com", None).unwrap().id;
        for _ in 0..100 {
            let op = registry.get(&id).unwrap();
            if op.status != OperationStatus::Pending {
                assert!(op.started_at.is_some());
            }
            if op.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn failing_stage_marks_operation_failed() {
        let registry = OperationRegistry::with_executor(
            fast_plan(),
            Arc::new(FailingExecutor { fail_on: "two" }),
            Arc::new(SystemClock),
        );
        let id = registry.create("acme.com", None).unwrap().id;
        let op = wait_for(&registry, &id, OperationStatus::Failed).await;
        assert_eq!(op.error.as_deref(), Some("two crashed"));
        assert_eq!(op.progress, 40);
        assert!(op.results.is_none());
        assert!(op.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_during_processing_is_never_overwritten() {
        let executor = Arc::new(GatedExecutor {
            gate: tokio::sync::Notify::new(),
            entered: AtomicUsize::new(0),
        });
        let registry = OperationRegistry::with_executor(
            fast_plan(),
            Arc::clone(&executor) as Arc<dyn StageExecutor>,
            Arc::new(SystemClock),
        );
        let id = registry.create("acme.com", None).unwrap().id;

        let processing = wait_for(&registry, &id, OperationStatus::Processing).await;
        assert!(processing.started_at.is_some());
        while executor.entered.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let cancelled = registry.cancel(&id).unwrap();
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_BY_CALLER));
        assert_eq!(cancelled.progress, 0);

        executor.gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let after = registry.get(&id).unwrap();
        assert_eq!(after, cancelled);
        assert_eq!(executor.entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(SystemClock));
        let id = registry.create("acme.com", None).unwrap().id;

        let first = registry.cancel(&id).unwrap();
        let second = registry.cancel(&id).unwrap();
        assert_eq!(first.status, OperationStatus::Cancelled);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn cancel_completed_is_noop() {
        let registry = OperationRegistry::new(fast_plan(), Arc::new(SystemClock));
        let id = registry.create("acme.com", None).unwrap().id;
        let done = wait_for(&registry, &id, OperationStatus::Completed).await;
        assert_eq!(registry.cancel(&id).unwrap(), done);
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(SystemClock));
        assert!(matches!(registry.cancel("missing"), Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn terminal_state_is_sticky_under_sampling() {
        let registry = OperationRegistry::new(fast_plan(), Arc::new(SystemClock));
        let id = registry.create("acme.com", None).unwrap().id;
        let cancelled = registry.cancel(&id).unwrap();
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(registry.get(&id).unwrap().status, cancelled.status);
        }
    }

    #[test]
    fn list_filters_on_both_fields_newest_first() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(ManualClock::new(0)));
        registry.insert_for_test(finished("a", OperationStatus::Completed, Priority::High, 100));
        registry.insert_for_test(finished("b", OperationStatus::Completed, Priority::Low, 200));
        registry.insert_for_test(finished("c", OperationStatus::Failed, Priority::High, 300));
        registry.insert_for_test(finished("d", OperationStatus::Completed, Priority::High, 400));

        let page = registry.list(ListQuery {
            status: Some(OperationStatus::Completed),
            priority: Some(Priority::High),
            limit: None,
        });
        let ids: Vec<&str> = page.operations.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
        assert_eq!(page.total, 2);
        assert_eq!(page.limit, DEFAULT_LIST_LIMIT);

        let all = registry.list(ListQuery::default());
        assert_eq!(all.operations.len(), 4);
        assert_eq!(all.operations[0].id, "d");
    }

    #[test]
    fn list_truncates_but_reports_matching_total() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(ManualClock::new(0)));
        for i in 0..10u64 {
            registry.insert_for_test(finished(
                &format!("op{i}"),
                OperationStatus::Completed,
                Priority::Medium,
                i,
            ));
        }
        let page = registry.list(ListQuery {
            limit: Some(3),
            ..ListQuery::default()
        });
        assert_eq!(page.operations.len(), 3);
        assert_eq!(page.total, 10);
        assert_eq!(page.operations[0].id, "op9");
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(normalize_limit(None), 50);
        assert_eq!(normalize_limit(Some(0)), 50);
        assert_eq!(normalize_limit(Some(-7)), 50);
        assert_eq!(normalize_limit(Some(5_000)), 1000);
        assert_eq!(normalize_limit(Some(1000)), 1000);
        assert_eq!(normalize_limit(Some(17)), 17);
    }

    proptest! {
        #[test]
        fn normalized_limit_is_always_in_range(limit in proptest::option::of(any::<i64>())) {
            let n = normalize_limit(limit);
            prop_assert!((1..=MAX_LIST_LIMIT).contains(&n));
        }
    }

    #[test]
    fn stats_counts_rates_and_average_duration() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(ManualClock::new(0)));
        let empty = registry.stats();
        assert_eq!(empty.total_operations, 0);
        assert!(empty.success_rate.abs() < f64::EPSILON);
        assert_eq!(empty.average_duration_ms, 0);

        let mut slow = finished("slow", OperationStatus::Processing, Priority::Medium, 0);
        slow.complete(3_000, json!({})).unwrap();
        registry.insert_for_test(slow);
        registry.insert_for_test(finished("fast", OperationStatus::Completed, Priority::Medium, 0));
        registry.insert_for_test(finished("f", OperationStatus::Failed, Priority::Medium, 0));
        registry.insert_for_test(finished("c", OperationStatus::Cancelled, Priority::Medium, 0));
        registry.insert_for_test(Operation::new("p".into(), "t".into(), Priority::Low, 0));

        let stats = registry.stats();
        assert_eq!(stats.total_operations, 5);
        assert_eq!(stats.pending_operations, 1);
        assert_eq!(stats.processing_operations, 0);
        assert_eq!(stats.completed_operations, 2);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.cancelled_operations, 1);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.average_duration_ms, 2_000);
        assert_eq!(stats.average_duration, "2s");
    }

    #[test]
    fn prune_removes_only_old_terminal_operations() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = OperationRegistry::new(frozen_plan(), Arc::clone(&clock) as Arc<dyn ClockSource>);

        registry.insert_for_test(finished("old-done", OperationStatus::Completed, Priority::Medium, 0));
        registry.insert_for_test(finished("old-failed", OperationStatus::Failed, Priority::Medium, 0));
        registry.insert_for_test(finished("old-cancelled", OperationStatus::Cancelled, Priority::Medium, 0));
        registry.insert_for_test(finished("old-running", OperationStatus::Processing, Priority::Medium, 0));
        registry.insert_for_test(Operation::new("old-pending".into(), "t".into(), Priority::Medium, 0));

        clock.set(800 * HOUR);
        registry.insert_for_test(finished("new-done", OperationStatus::Completed, Priority::Medium, 790 * HOUR));

        let report = registry.prune(DEFAULT_RETENTION).unwrap();
        assert_eq!(report.max_age, Duration::from_secs(720 * 3600));
        assert_eq!(report.deleted_count, 3);
        assert_eq!(report.remaining_operations, 3);
        assert_eq!(report.cutoff_time, 80 * HOUR);

        for kept in ["old-running", "old-pending", "new-done"] {
            assert!(registry.get(kept).is_ok(), "{kept} should survive");
        }
        for gone in ["old-done", "old-failed", "old-cancelled"] {
            assert!(registry.get(gone).is_err(), "{gone} should be pruned");
        }
    }

    #[test]
    fn prune_rejects_malformed_duration() {
        let registry = OperationRegistry::new(frozen_plan(), Arc::new(ManualClock::new(0)));
        assert!(matches!(registry.prune("thirty days"), Err(RegistryError::Validation(_))));
        assert!(matches!(registry.prune(""), Err(RegistryError::Validation(_))));
    }

    #[tokio::test]
    async fn from_config_with_zero_scale_completes_quickly() {
        let config = RegistryConfig {
            stage_delay_scale: 0.0,
            ..RegistryConfig::default()
        };
        let registry = OperationRegistry::from_config(&config, Arc::new(SystemClock));
        let id = registry.create("acme.com", Some("critical")).unwrap().id;
        let op = wait_for(&registry, &id, OperationStatus::Completed).await;
        assert_eq!(op.priority, Priority::Critical);
        assert_eq!(op.current_stage.as_deref(), Some("Final correlation"));
    }

    #[test]
    fn parse_max_age_accepts_compound_durations() {
        assert_eq!(parse_max_age("720h").unwrap(), Duration::from_secs(720 * 3600));
        assert_eq!(parse_max_age("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_max_age(" 90s ").unwrap(), Duration::from_secs(90));
    }
}
