//! Per-store admin execution pool.
//!
//! Each store with pending operations gets one task per cycle. A task
//! drains its store's queue sequentially, so per-store order is preserved
//! while stores execute in parallel, bounded by the worker pool. All tasks
//! of a cycle share one deadline; tasks that miss it are cancelled
//! cooperatively (they stop at the next operation boundary) and classified
//! by whether their store's execution id advanced during the cycle.

use crate::control::operation::AdminOperation;
use crate::control::progress::ProgressStore;
use crate::core::error::{StrataError, StrataResult};
use crate::ops::metrics::{names, MetricsRegistry};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Admin handler collaborator.
///
/// Applies one operation to cluster metadata. Deterministic, and idempotent
/// relative to execution id: re-applying an already-applied operation after
/// a crash must be a no-op.
pub trait AdminHandler: Send + Sync {
    fn apply(&self, store: &str, operation: &AdminOperation) -> StrataResult<()>;
}

/// FIFO queue of `(offset, operation)` pairs pending for one store.
pub type StoreQueue = Mutex<VecDeque<(u64, AdminOperation)>>;

/// Create an empty store queue.
pub fn new_store_queue() -> Arc<StoreQueue> {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Summary of one execution cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Largest execution id observed as succeeded during this cycle.
    pub largest_succeeded_execution_id: Option<u64>,
    /// Operations still pending across problematic stores.
    pub pending_operations: usize,
    /// Number of stores left problematic by this cycle.
    pub stores_with_pending: usize,
}

/// Bounded worker pool draining per-store queues.
pub struct AdminExecutionPool {
    handler: Arc<dyn AdminHandler>,
    progress: Arc<ProgressStore>,
    metrics: Arc<MetricsRegistry>,
    permits: Arc<Semaphore>,
    cycle_timeout: Duration,
}

impl AdminExecutionPool {
    pub fn new(
        handler: Arc<dyn AdminHandler>,
        progress: Arc<ProgressStore>,
        metrics: Arc<MetricsRegistry>,
        max_workers: usize,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            handler,
            progress,
            metrics,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            cycle_timeout,
        }
    }

    /// Drain every non-empty store queue concurrently and classify the
    /// outcome per store.
    ///
    /// `offset_to_skip` is the operator's single-shot poison-message
    /// override: a store whose head offset matches it has that one entry
    /// dequeued without execution, consuming the sentinel.
    ///
    /// `problematic` is updated in place: stores that completed cleanly are
    /// removed; stores that failed, or timed out without advancing their
    /// execution id, are recorded with their blocking head offset.
    pub async fn execute_cycle(
        &self,
        queues: &HashMap<String, Arc<StoreQueue>>,
        offset_to_skip: &mut Option<u64>,
        problematic: &mut HashMap<String, u64>,
        cluster_last_succeeded: Option<u64>,
    ) -> StrataResult<CycleReport> {
        let start_ids = self.progress.execution_id_by_store()?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut handles: Vec<(String, JoinHandle<StrataResult<()>>)> = Vec::new();

        for (store, queue) in queues {
            {
                let mut pending = queue.lock();
                let head = pending.front().map(|(offset, _)| *offset);
                if head.is_some() && head == *offset_to_skip {
                    tracing::warn!(store = %store, offset = ?head, "skipping admin operation as instructed");
                    *offset_to_skip = None;
                    pending.pop_front();
                }
                if pending.is_empty() {
                    continue;
                }
            }

            let baseline = start_ids
                .get(store.as_str())
                .copied()
                .or(cluster_last_succeeded);
            let task = StoreDrainTask {
                store: store.clone(),
                queue: queue.clone(),
                baseline,
                handler: self.handler.clone(),
                progress: self.progress.clone(),
                cancelled: cancelled.clone(),
            };
            let permits = self.permits.clone();
            handles.push((
                store.clone(),
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| StrataError::internal("admin worker pool closed"))?;
                    tokio::task::spawn_blocking(move || task.drain())
                        .await
                        .map_err(|e| StrataError::internal(format!("store task panicked: {e}")))?
                }),
            ));
        }

        let deadline = Instant::now() + self.cycle_timeout;
        let mut outcomes: Vec<(String, StoreTaskOutcome)> = Vec::new();
        for (store, mut handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(Ok(()))) => outcomes.push((store, StoreTaskOutcome::Completed)),
                Ok(Ok(Err(e))) => outcomes.push((store, StoreTaskOutcome::Failed(e))),
                Ok(Err(join_err)) => outcomes.push((
                    store,
                    StoreTaskOutcome::Failed(StrataError::internal(format!(
                        "store task join failed: {join_err}"
                    ))),
                )),
                Err(_) => {
                    // Deadline passed. Cancel cooperatively and leave the
                    // task to stop at its next operation boundary.
                    cancelled.store(true, Ordering::Release);
                    outcomes.push((store, StoreTaskOutcome::TimedOut));
                }
            }
        }

        let end_ids = self.progress.execution_id_by_store()?;
        let mut report = CycleReport {
            largest_succeeded_execution_id: cluster_last_succeeded,
            ..CycleReport::default()
        };

        for (store, outcome) in outcomes {
            let newly_succeeded = end_ids
                .get(store.as_str())
                .copied()
                .or(cluster_last_succeeded);
            if newly_succeeded > report.largest_succeeded_execution_id {
                report.largest_succeeded_execution_id = newly_succeeded;
            }

            match outcome {
                StoreTaskOutcome::Completed => {
                    problematic.remove(&store);
                }
                StoreTaskOutcome::Failed(error) => {
                    tracing::warn!(store = %store, error = %error, "admin operations failed");
                    self.mark_problematic(&store, queues, problematic, &mut report);
                }
                StoreTaskOutcome::TimedOut => {
                    let advanced =
                        end_ids.get(store.as_str()) != start_ids.get(store.as_str());
                    if advanced {
                        // Made progress; remaining work retries next cycle.
                        problematic.remove(&store);
                    } else {
                        tracing::warn!(store = %store, "admin operations did not finish in time");
                        self.mark_problematic(&store, queues, problematic, &mut report);
                    }
                }
            }
        }

        Ok(report)
    }

    fn mark_problematic(
        &self,
        store: &str,
        queues: &HashMap<String, Arc<StoreQueue>>,
        problematic: &mut HashMap<String, u64>,
        report: &mut CycleReport,
    ) {
        if let Some(queue) = queues.get(store) {
            let pending = queue.lock();
            if let Some((head_offset, _)) = pending.front() {
                problematic.insert(store.to_string(), *head_offset);
                report.pending_operations += pending.len();
                report.stores_with_pending += 1;
                self.metrics
                    .counter_inc_labeled(names::ADMIN_STORE_FAILURES_TOTAL, &[("store", store)]);
            }
        }
    }
}

enum StoreTaskOutcome {
    Completed,
    Failed(StrataError),
    TimedOut,
}

/// Admin handler that records operations in the log only.
///
/// Single-process deployments without a metadata backend use this; real
/// controllers wire their metadata store behind [`AdminHandler`].
#[derive(Debug, Default)]
pub struct LoggingAdminHandler;

impl AdminHandler for LoggingAdminHandler {
    fn apply(&self, store: &str, operation: &AdminOperation) -> StrataResult<()> {
        tracing::info!(
            store = %store,
            operation = operation.operation_type(),
            execution_id = operation.execution_id,
            "applied admin operation"
        );
        Ok(())
    }
}

/// Sequential drain of one store's queue.
struct StoreDrainTask {
    store: String,
    queue: Arc<StoreQueue>,
    baseline: Option<u64>,
    handler: Arc<dyn AdminHandler>,
    progress: Arc<ProgressStore>,
    cancelled: Arc<AtomicBool>,
}

impl StoreDrainTask {
    fn drain(self) -> StrataResult<()> {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Ok(());
            }
            let Some((_, operation)) = self.queue.lock().front().cloned() else {
                return Ok(());
            };

            // Re-delivered operations already applied for this store are
            // dropped; the handler is only invoked for new execution ids.
            let already_applied = self
                .baseline
                .is_some_and(|baseline| operation.execution_id <= baseline);
            if !already_applied {
                self.handler.apply(&self.store, &operation)?;
                self.progress
                    .update_execution_id_for_store(&self.store, operation.execution_id)?;
            }
            self.queue.lock().pop_front();
        }
    }
}
