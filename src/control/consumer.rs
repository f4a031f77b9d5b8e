//! Admin log consumption task.
//!
//! One long-lived task per cluster drives the controller's write side,
//! one tick per `read_cycle_delay`: leader check, subscribe, poll,
//! per-store delegation, parallel execution, and progress persistence.
//!
//! Only the elected leader consumes. On loss of leadership, or on any
//! transport error, the task unsubscribes and wipes all volatile state;
//! durable progress in the coordination store is the sole source of truth,
//! so the next subscription resumes from the last persisted offset and
//! re-delivered records are recognized as duplicates and dropped.
//!
//! Two single-shot operator overrides unblock a stalled stream: skipping a
//! poisoned record at the failing offset, or skipping data integrity
//! validation there to accept an execution-id gap. Both are rejected unless
//! they name exactly the first failing offset.

use crate::control::coordination::{CoordinationStore, LeaderElection};
use crate::control::div::{DivValidator, DivVerdict};
use crate::control::executor::{
    new_store_queue, AdminExecutionPool, AdminHandler, StoreQueue,
};
use crate::control::log::{
    admin_topic_name, AdminLogAdmin, AdminLogConsumer, LogRecord, MessageType,
    ADMIN_LOG_PARTITION,
};
use crate::control::operation::AdminOperationCodec;
use crate::control::progress::{AdminOffsetRecord, ProgressStore};
use crate::core::config::AdminConfig;
use crate::core::error::{StrataError, StrataResult};
use crate::ops::metrics::{names, MetricsRegistry};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How often a child controller logs that it is waiting for the admin topic.
const TOPIC_WAIT_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Collaborators wired into the consumer task.
pub struct AdminConsumerDeps {
    pub log_consumer: Arc<dyn AdminLogConsumer>,
    pub log_admin: Arc<dyn AdminLogAdmin>,
    pub leadership: Arc<dyn LeaderElection>,
    pub handler: Arc<dyn AdminHandler>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Operator-visible state, shared with skip controls and metrics readers.
#[derive(Debug, Default)]
struct SharedControls {
    /// Smallest offset currently blocked, by DIV or by execution failure.
    failing_offset: Option<u64>,
    /// Single-shot skip of the record at this offset.
    offset_to_skip: Option<u64>,
    /// Single-shot DIV bypass for the record at this offset.
    offset_to_skip_div: Option<u64>,
    /// Cluster-wide progress, mirrored for cheap reads.
    last_succeeded_execution_id: Option<u64>,
}

/// Volatile per-subscription state, owned by the consumption loop.
struct LoopState {
    subscribed: bool,
    topic_exists: bool,
    last_topic_wait_log: Option<Instant>,
    /// Records polled but not yet delegated. Polling is skipped while this
    /// buffer is non-empty so a mid-batch failure loses nothing.
    undelivered: VecDeque<LogRecord>,
    /// Per-store FIFO queues of pending operations.
    queues: HashMap<String, Arc<StoreQueue>>,
    /// Stores that failed or stalled last cycle, with their blocking offset.
    problematic: HashMap<String, u64>,
    /// Largest offset seen in-memory; persisted iff the cycle succeeds.
    last_offset: Option<u64>,
    last_persisted_offset: Option<u64>,
    /// Cluster-wide execution id, refreshed from durable state each cycle.
    last_succeeded: Option<u64>,
    div: DivValidator,
}

impl LoopState {
    fn new() -> Self {
        Self {
            subscribed: false,
            topic_exists: false,
            last_topic_wait_log: None,
            undelivered: VecDeque::new(),
            queues: HashMap::new(),
            problematic: HashMap::new(),
            last_offset: None,
            last_persisted_offset: None,
            last_succeeded: None,
            div: DivValidator::new(),
        }
    }
}

/// The per-cluster admin consumption task.
pub struct AdminConsumerTask {
    cluster: String,
    topic: String,
    is_parent_controller: bool,
    replication_factor: u32,
    read_cycle_delay: Duration,

    log_consumer: Arc<dyn AdminLogConsumer>,
    log_admin: Arc<dyn AdminLogAdmin>,
    leadership: Arc<dyn LeaderElection>,
    metrics: Arc<MetricsRegistry>,
    progress: Arc<ProgressStore>,
    pool: AdminExecutionPool,
    codec: AdminOperationCodec,

    running: AtomicBool,
    shared: Mutex<SharedControls>,
    state: tokio::sync::Mutex<LoopState>,
}

impl AdminConsumerTask {
    pub fn new(
        cluster: &str,
        parent_controller: bool,
        config: &AdminConfig,
        deps: AdminConsumerDeps,
    ) -> Arc<Self> {
        let progress = Arc::new(ProgressStore::new(deps.coordination, cluster));
        let pool = AdminExecutionPool::new(
            deps.handler,
            progress.clone(),
            deps.metrics.clone(),
            config.max_worker_pool_size,
            Duration::from_millis(config.cycle_timeout_ms),
        );
        Arc::new(Self {
            cluster: cluster.to_string(),
            topic: admin_topic_name(cluster),
            is_parent_controller: parent_controller,
            replication_factor: config.topic_replication_factor,
            read_cycle_delay: Duration::from_millis(config.read_cycle_delay_ms),
            log_consumer: deps.log_consumer,
            log_admin: deps.log_admin,
            leadership: deps.leadership,
            metrics: deps.metrics,
            progress,
            pool,
            codec: AdminOperationCodec::new(),
            running: AtomicBool::new(true),
            shared: Mutex::new(SharedControls::default()),
            state: tokio::sync::Mutex::new(LoopState::new()),
        })
    }

    /// The admin topic consumed by this task.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run consumption ticks until [`stop`](Self::stop) is called.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(cluster = %self.cluster, topic = %self.topic, "admin consumer running");
        while self.running.load(Ordering::Acquire) {
            tokio::time::sleep(self.read_cycle_delay).await;
            if let Err(error) = self.run_once().await {
                // Start over from durable state next tick so that no polled
                // record is lost.
                tracing::error!(cluster = %self.cluster, error = %error, "admin consumption tick failed");
                let mut state = self.state.lock().await;
                self.unsubscribe(&mut state);
            }
        }
        let mut state = self.state.lock().await;
        self.unsubscribe(&mut state);
        tracing::info!(cluster = %self.cluster, "admin consumer closed");
    }

    /// Request the task loop to stop after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// One consumption tick: leader gate, subscribe, poll, delegate,
    /// execute, persist. Exposed so tests can drive ticks deterministically.
    pub async fn run_once(&self) -> StrataResult<()> {
        let mut state = self.state.lock().await;

        if !self.leadership.is_leader(&self.cluster) {
            self.unsubscribe(&mut state);
            return Ok(());
        }

        if !state.subscribed {
            if !self.ensure_topic(&mut state)? {
                return Ok(());
            }
            self.subscribe(&mut state)?;
        }

        if state.undelivered.is_empty() {
            let records = self.log_consumer.poll(self.read_cycle_delay)?;
            if !records.is_empty() {
                tracing::debug!(count = records.len(), "polled admin records");
            }
            state.undelivered.extend(records);
        } else {
            tracing::debug!("draining undelivered records before polling again");
        }

        while let Some(record) = state.undelivered.front().cloned() {
            match self.delegate(&mut state, &record) {
                Ok(()) => {
                    state.undelivered.pop_front();
                    if state.last_offset < Some(record.offset) {
                        state.last_offset = Some(record.offset);
                    }
                }
                Err(error) if error.blocks_consumption() => {
                    tracing::error!(
                        offset = record.offset,
                        error = %error,
                        "admin consumption blocked"
                    );
                    self.shared.lock().failing_offset = Some(record.offset);
                    self.metrics.counter_inc(names::ADMIN_FAILED_CONSUMPTION_TOTAL);
                    if matches!(error, StrataError::ExecutionIdGap { .. }) {
                        self.metrics.counter_inc(names::ADMIN_DIV_ERROR_TOTAL);
                    }
                    break;
                }
                Err(error) => return Err(error),
            }
        }

        // Leadership may have moved while delegating; discard the cycle
        // rather than execute or persist as a non-leader.
        if !self.leadership.is_leader(&self.cluster) {
            self.unsubscribe(&mut state);
            return Ok(());
        }

        self.execute_and_reconcile(&mut state).await?;

        let failing = self.shared.lock().failing_offset;
        self.metrics
            .gauge_set(names::ADMIN_FAILED_OFFSET, failing.unwrap_or(0));
        Ok(())
    }

    /// Skip the poisoned record at `offset`. Honored only when `offset` is
    /// exactly the first failing one.
    pub fn skip_message(&self, offset: u64) -> StrataResult<()> {
        let mut shared = self.shared.lock();
        if shared.failing_offset == Some(offset) {
            shared.offset_to_skip = Some(offset);
            Ok(())
        } else {
            Err(StrataError::SkipRejected {
                requested: offset,
                failing: shared.failing_offset,
            })
        }
    }

    /// Skip data integrity validation for the record at `offset`, accepting
    /// the gap and realigning the execution-id baseline. Honored only when
    /// `offset` is exactly the first failing one.
    pub fn skip_message_div(&self, offset: u64) -> StrataResult<()> {
        let mut shared = self.shared.lock();
        if shared.failing_offset == Some(offset) {
            shared.offset_to_skip_div = Some(offset);
            Ok(())
        } else {
            Err(StrataError::SkipRejected {
                requested: offset,
                failing: shared.failing_offset,
            })
        }
    }

    /// Smallest offset currently blocked, if any.
    pub fn failing_offset(&self) -> Option<u64> {
        self.shared.lock().failing_offset
    }

    /// Cluster-wide execution-id progress as of the last cycle.
    pub fn last_succeeded_execution_id(&self) -> Option<u64> {
        self.shared.lock().last_succeeded_execution_id
    }

    /// Ensure the admin topic exists with unbounded retention. Returns
    /// false while a child controller is still waiting for the parent to
    /// create it.
    fn ensure_topic(&self, state: &mut LoopState) -> StrataResult<bool> {
        if !state.topic_exists {
            state.topic_exists = self.log_admin.contains_topic(&self.topic)?;
        }
        if state.topic_exists {
            // Created by another process; make sure records never expire.
            self.log_admin.update_retention_infinite(&self.topic)?;
            return Ok(true);
        }
        if !self.is_parent_controller {
            let should_log = state
                .last_topic_wait_log
                .map_or(true, |at| at.elapsed() >= TOPIC_WAIT_LOG_INTERVAL);
            if should_log {
                tracing::info!(
                    topic = %self.topic,
                    "admin topic not created yet; waiting for the parent controller"
                );
                state.last_topic_wait_log = Some(Instant::now());
            }
            return Ok(false);
        }
        tracing::info!(topic = %self.topic, "creating admin topic");
        self.log_admin
            .create_topic(&self.topic, 1, self.replication_factor)?;
        self.log_admin.update_retention_infinite(&self.topic)?;
        state.topic_exists = true;
        Ok(true)
    }

    fn subscribe(&self, state: &mut LoopState) -> StrataResult<()> {
        let offset_record = self.progress.last_offset()?;
        let baseline = self.progress.last_succeeded_execution_id()?;

        state.last_offset = offset_record.offset;
        state.last_persisted_offset = offset_record.offset;
        state.last_succeeded = baseline;
        state.div.reset_to(baseline);
        self.shared.lock().last_succeeded_execution_id = baseline;

        // Subscribing at the persisted offset may re-deliver the record at
        // that exact position; the already-processed guard drops it.
        let subscribe_offset = offset_record.offset.unwrap_or(0);
        self.log_consumer
            .subscribe(&self.topic, ADMIN_LOG_PARTITION, subscribe_offset)?;
        state.subscribed = true;
        tracing::info!(
            topic = %self.topic,
            offset = subscribe_offset,
            execution_id = ?baseline,
            "subscribed to admin topic"
        );
        Ok(())
    }

    fn unsubscribe(&self, state: &mut LoopState) {
        if !state.subscribed {
            return;
        }
        if let Err(error) = self
            .log_consumer
            .unsubscribe(&self.topic, ADMIN_LOG_PARTITION)
        {
            tracing::warn!(topic = %self.topic, error = %error, "unsubscribe failed");
        }
        state.subscribed = false;
        state.undelivered.clear();
        state.queues.clear();
        state.problematic.clear();
        state.last_offset = None;
        state.last_persisted_offset = None;
        state.last_succeeded = None;
        state.div.reset();

        let mut shared = self.shared.lock();
        shared.failing_offset = None;
        shared.offset_to_skip = None;
        shared.offset_to_skip_div = None;
        shared.last_succeeded_execution_id = None;
        drop(shared);

        self.metrics.gauge_set(names::ADMIN_PENDING_MESSAGES, 0);
        self.metrics.gauge_set(names::ADMIN_STORES_WITH_PENDING, 0);
        tracing::info!(topic = %self.topic, "unsubscribed from admin topic");
    }

    /// Route one record into its store's pending queue.
    fn delegate(&self, state: &mut LoopState, record: &LogRecord) -> StrataResult<()> {
        {
            let mut shared = self.shared.lock();
            if shared.offset_to_skip == Some(record.offset) {
                shared.offset_to_skip = None;
                tracing::warn!(offset = record.offset, "skipping admin record as instructed");
                return Ok(());
            }
        }

        if record.topic != self.topic || record.partition != ADMIN_LOG_PARTITION {
            return Err(StrataError::LogMismatch {
                expected: format!("{}#{}", self.topic, ADMIN_LOG_PARTITION),
                received: format!("{}#{}", record.topic, record.partition),
            });
        }

        // Already-processed guard. This is belt and braces next to DIV and
        // must not touch the execution-id baseline.
        if state.last_offset.is_some_and(|last| record.offset <= last) {
            tracing::debug!(
                offset = record.offset,
                last_offset = ?state.last_offset,
                "dropping already-processed admin record"
            );
            return Ok(());
        }

        if record.key.control {
            tracing::debug!(offset = record.offset, "dropping transport control record");
            return Ok(());
        }

        if record.envelope.message_type != MessageType::Put {
            return Err(StrataError::UnexpectedMessageType {
                message_type: record.envelope.message_type.to_string(),
            });
        }

        let operation = self.codec.decode(
            record.envelope.schema_id,
            &record.envelope.payload,
            record.offset,
        )?;

        if let Some(offset) = self.shared.lock().offset_to_skip_div.take() {
            state.div.arm_skip(offset);
        }
        match state.div.check(operation.execution_id, record.offset) {
            DivVerdict::Accepted => {}
            DivVerdict::Duplicate => {
                tracing::info!(
                    offset = record.offset,
                    execution_id = operation.execution_id,
                    "dropping duplicate admin operation"
                );
                return Ok(());
            }
            DivVerdict::Gap => {
                return Err(StrataError::ExecutionIdGap {
                    last_delegated: state.div.last_delegated().unwrap_or(0),
                    incoming: operation.execution_id,
                });
            }
        }

        let store_name = operation.store_name()?;
        state
            .queues
            .entry(store_name)
            .or_insert_with(new_store_queue)
            .lock()
            .push_back((record.offset, operation));
        Ok(())
    }

    async fn execute_and_reconcile(&self, state: &mut LoopState) -> StrataResult<()> {
        state.last_succeeded = self.progress.last_succeeded_execution_id()?;

        let has_pending = state.queues.values().any(|queue| !queue.lock().is_empty());
        if !has_pending {
            // Nothing queued, e.g. after a delegation-time skip; progress
            // still persists so the offset can move past skipped records.
            return self.persist_progress(state);
        }

        let cycle_start = Instant::now();
        let mut offset_to_skip = self.shared.lock().offset_to_skip;
        let report = self
            .pool
            .execute_cycle(
                &state.queues,
                &mut offset_to_skip,
                &mut state.problematic,
                state.last_succeeded,
            )
            .await?;
        self.shared.lock().offset_to_skip = offset_to_skip;

        self.metrics.histogram_observe(
            names::ADMIN_CYCLE_DURATION_MS,
            cycle_start.elapsed().as_secs_f64() * 1_000.0,
        );
        self.metrics.gauge_set(
            names::ADMIN_PENDING_MESSAGES,
            report.pending_operations as u64,
        );
        self.metrics.gauge_set(
            names::ADMIN_STORES_WITH_PENDING,
            report.stores_with_pending as u64,
        );

        if state.problematic.is_empty() {
            if report.largest_succeeded_execution_id > state.last_succeeded {
                state.last_succeeded = report.largest_succeeded_execution_id;
            }
            let mut shared = self.shared.lock();
            if shared
                .failing_offset
                .is_some_and(|failing| Some(failing) <= state.last_offset)
            {
                shared.failing_offset = None;
            }
            drop(shared);
            self.persist_progress(state)?;
        } else {
            // At least one store is stuck: hold the offset and point the
            // failing offset at the earliest blocked record, without
            // overwriting a delegation-time failure that sits ahead.
            let smallest = state.problematic.values().copied().min();
            let mut shared = self.shared.lock();
            let delegation_failure_ahead = shared
                .failing_offset
                .is_some_and(|failing| Some(failing) > state.last_offset);
            if !delegation_failure_ahead {
                shared.failing_offset = smallest;
            }
        }
        Ok(())
    }

    fn persist_progress(&self, state: &mut LoopState) -> StrataResult<()> {
        self.progress
            .update_last_succeeded_execution_id(state.last_succeeded)?;
        self.shared.lock().last_succeeded_execution_id = state.last_succeeded;

        if state.last_persisted_offset == state.last_offset {
            return Ok(());
        }
        self.progress.update_last_offset(&AdminOffsetRecord {
            offset: state.last_offset,
            metadata: HashMap::new(),
        })?;
        state.last_persisted_offset = state.last_offset;
        Ok(())
    }
}
