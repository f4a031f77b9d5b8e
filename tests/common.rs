#![allow(dead_code)]

//! Common test utilities.
//!
//! Shared fixtures for the admin-consumer and read-path integration
//! tests. Import with `mod common;` in test files.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata::config::{AdminConfig, Config, ServeConfig};
use strata::consumer::{AdminConsumerDeps, AdminConsumerTask};
use strata::coordination::{LeaderElection, MemoryCoordination, StaticLeadership};
use strata::dispatcher::{ReadDispatcher, ReadDispatcherDeps};
use strata::engine::{MemoryStorageEngine, StorageEngineRepository};
use strata::error::StrataResult;
use strata::executor::AdminHandler;
use strata::health::StaticDiskHealth;
use strata::log::{admin_topic_name, LogEnvelope, LogRecordKey, MemoryAdminLog, MessageType};
use strata::meta::MemoryMetadata;
use strata::metrics::MetricsRegistry;
use strata::operation::{AdminOperation, AdminOperationCodec, AdminPayload, PauseStore};
use strata::progress::ProgressStore;
use strata::record::{FieldSchema, FieldType, Record, RecordSchema, Value};
use strata::registry::MemorySchemaRegistry;
use strata::schema::codec as value_codec;
use strata::storage::chunking;

pub const CLUSTER: &str = "test-cluster";

/// Minimal valid configuration.
pub fn minimal_config() -> Config {
    Config::from_toml(
        r#"
[cluster]
name = "test-cluster"
"#,
    )
    .expect("minimal config parses")
}

/// Admin config tuned for fast test cycles.
pub fn fast_admin_config(cycle_timeout_ms: u64, pool_size: usize) -> AdminConfig {
    AdminConfig {
        read_cycle_delay_ms: 5,
        cycle_timeout_ms,
        max_worker_pool_size: pool_size,
        topic_replication_factor: 1,
    }
}

/// Admin handler recording applied operations, with injectable per-store
/// delays and failures.
pub struct RecordingHandler {
    applied: Mutex<Vec<(String, u64)>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    /// Applied `(store, execution_id)` pairs, in application order.
    pub fn applied(&self) -> Vec<(String, u64)> {
        self.applied.lock().clone()
    }

    /// Applied execution ids for one store, in application order.
    pub fn applied_for(&self, store: &str) -> Vec<u64> {
        self.applied
            .lock()
            .iter()
            .filter(|(s, _)| s == store)
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn set_delay(&self, store: &str, delay: Duration) {
        self.delays.lock().insert(store.to_string(), delay);
    }

    pub fn clear_delay(&self, store: &str) {
        self.delays.lock().remove(store);
    }

    pub fn set_failing(&self, store: &str, failing: bool) {
        if failing {
            self.failing.lock().insert(store.to_string());
        } else {
            self.failing.lock().remove(store);
        }
    }
}

impl AdminHandler for RecordingHandler {
    fn apply(&self, store: &str, operation: &AdminOperation) -> StrataResult<()> {
        let delay = self.delays.lock().get(store).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.failing.lock().contains(store) {
            return Err(strata::error::StrataError::HandlerFailed {
                store: store.to_string(),
                reason: "injected failure".into(),
            });
        }
        self.applied
            .lock()
            .push((store.to_string(), operation.execution_id));
        Ok(())
    }
}

/// Leadership that answers `true` for the first `true_answers` queries,
/// then `false`. Used to revoke leadership mid-tick.
pub struct CountingLeadership {
    remaining: AtomicU32,
}

impl CountingLeadership {
    pub fn new(true_answers: u32) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicU32::new(true_answers),
        })
    }
}

impl LeaderElection for CountingLeadership {
    fn is_leader(&self, _cluster: &str) -> bool {
        loop {
            let remaining = self.remaining.load(Ordering::Acquire);
            if remaining == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange(remaining, remaining - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Everything needed to drive an admin consumer in a test.
pub struct ConsumerFixture {
    pub log: Arc<MemoryAdminLog>,
    pub coordination: Arc<MemoryCoordination>,
    pub leadership: Arc<StaticLeadership>,
    pub handler: Arc<RecordingHandler>,
    pub metrics: Arc<MetricsRegistry>,
    pub task: Arc<AdminConsumerTask>,
    pub topic: String,
}

impl ConsumerFixture {
    pub fn new(config: AdminConfig) -> Self {
        let log = Arc::new(MemoryAdminLog::new());
        let coordination = Arc::new(MemoryCoordination::new());
        let leadership = Arc::new(StaticLeadership::new(true));
        let handler = RecordingHandler::new();
        let metrics = Arc::new(MetricsRegistry::new());
        let task = AdminConsumerTask::new(
            CLUSTER,
            true,
            &config,
            AdminConsumerDeps {
                log_consumer: log.clone(),
                log_admin: log.clone(),
                leadership: leadership.clone(),
                handler: handler.clone(),
                coordination: coordination.clone(),
                metrics: metrics.clone(),
            },
        );
        Self {
            topic: admin_topic_name(CLUSTER),
            log,
            coordination,
            leadership,
            handler,
            metrics,
            task,
        }
    }

    /// Rebuild the consumer task against the same log and coordination
    /// store, as a crashed-and-restarted controller would.
    pub fn restart(&mut self, config: AdminConfig) {
        let handler = RecordingHandler::new();
        self.task = AdminConsumerTask::new(
            CLUSTER,
            true,
            &config,
            AdminConsumerDeps {
                log_consumer: self.log.clone(),
                log_admin: self.log.clone(),
                leadership: self.leadership.clone(),
                handler: handler.clone(),
                coordination: self.coordination.clone(),
                metrics: self.metrics.clone(),
            },
        );
        self.handler = handler;
    }

    /// Progress accessor bound to the fixture's coordination store.
    pub fn progress(&self) -> ProgressStore {
        ProgressStore::new(self.coordination.clone(), CLUSTER)
    }

    /// Append a pause-store operation; returns its offset.
    pub fn append_op(&self, execution_id: u64, store: &str) -> u64 {
        let operation = AdminOperation::new(
            execution_id,
            AdminPayload::PauseStore(PauseStore {
                store_name: store.to_string(),
            }),
        );
        let codec = AdminOperationCodec::new();
        let (schema_id, payload) = codec.encode(&operation).expect("operation encodes");
        self.log.append(
            &self.topic,
            LogRecordKey::default(),
            LogEnvelope {
                message_type: MessageType::Put,
                schema_id,
                payload: Bytes::from(payload),
            },
        )
    }

    /// Append a transport control marker record.
    pub fn append_control(&self) -> u64 {
        self.log.append(
            &self.topic,
            LogRecordKey { control: true },
            LogEnvelope {
                message_type: MessageType::ControlMessage,
                schema_id: 0,
                payload: Bytes::new(),
            },
        )
    }

    /// Append an undecodable record; returns its offset.
    pub fn append_garbage(&self) -> u64 {
        self.log.append(
            &self.topic,
            LogRecordKey::default(),
            LogEnvelope {
                message_type: MessageType::Put,
                schema_id: 1,
                payload: Bytes::from_static(b"\xff\xff\xff\xff"),
            },
        )
    }
}

/// Value schema used by read-path tests.
pub fn profile_value_schema() -> RecordSchema {
    RecordSchema::new(
        "profile",
        vec![
            FieldSchema::new("id", FieldType::Long),
            FieldSchema::new("name", FieldType::Str),
            FieldSchema::new("embedding", FieldType::FloatVector),
            FieldSchema::nullable("optional_vector", FieldType::FloatVector),
        ],
    )
}

/// A profile record with a deterministic embedding.
pub fn profile_record(schema: Arc<RecordSchema>, id: i64, embedding: Vec<f32>) -> Record {
    let mut record = Record::new(schema);
    record.set("id", Value::Long(id)).expect("id field");
    record
        .set("name", Value::Str(format!("profile-{id}")))
        .expect("name field");
    record
        .set("embedding", Value::FloatVector(embedding))
        .expect("embedding field");
    record
}

/// Everything needed to drive the read dispatcher in a test.
pub struct ServeFixture {
    pub engines: Arc<StorageEngineRepository>,
    pub engine: Arc<MemoryStorageEngine>,
    pub meta: Arc<MemoryMetadata>,
    pub registry: Arc<MemorySchemaRegistry>,
    pub health: Arc<StaticDiskHealth>,
    pub metrics: Arc<MetricsRegistry>,
    pub dispatcher: Arc<ReadDispatcher>,
    pub resource: String,
}

impl ServeFixture {
    pub fn new(serve_config: ServeConfig) -> Self {
        Self::with_resource(serve_config, "profile_v1", true)
    }

    pub fn with_resource(serve_config: ServeConfig, resource: &str, chunked: bool) -> Self {
        let engines = Arc::new(StorageEngineRepository::new());
        let engine = Arc::new(MemoryStorageEngine::new());
        engines.register(resource, engine.clone());

        let meta = Arc::new(MemoryMetadata::new());
        meta.set_chunked(resource, chunked);

        let registry = Arc::new(MemorySchemaRegistry::new());
        registry.register("profile", 5, profile_value_schema());

        let health = Arc::new(StaticDiskHealth::new(true));
        let metrics = Arc::new(MetricsRegistry::new());
        let dispatcher = ReadDispatcher::new(
            serve_config,
            ReadDispatcherDeps {
                engines: engines.clone(),
                registry: registry.clone(),
                meta: meta.clone(),
                health: health.clone(),
                metrics: metrics.clone(),
                server_configs: Some(serde_json::json!({"cluster": CLUSTER})),
            },
        );
        Self {
            engines,
            engine,
            meta,
            registry,
            health,
            metrics,
            dispatcher,
            resource: resource.to_string(),
        }
    }

    /// Store a record unchunked under `key` in `partition`.
    pub fn put_record(&self, partition: u32, key: &[u8], record: &Record) {
        let encoded = value_codec::encode_record(5, record).expect("record encodes");
        self.engine.put(partition, key.to_vec(), Bytes::from(encoded));
    }

    /// Store a record split into chunks of `chunk_size` payload bytes.
    /// Returns the number of chunks written.
    pub fn put_chunked_record(
        &self,
        partition: u32,
        key: &[u8],
        record: &Record,
        chunk_size: usize,
    ) -> usize {
        let encoded = value_codec::encode_record(5, record).expect("record encodes");
        let (manifest, chunks) =
            chunking::chunk_value(key, &encoded, chunk_size).expect("value chunks");
        let chunk_count = chunks.len();
        self.engine.put(
            partition,
            key.to_vec(),
            Bytes::from(manifest.encode().expect("manifest encodes")),
        );
        for (chunk_key, chunk) in chunks {
            self.engine.put(partition, chunk_key, Bytes::from(chunk));
        }
        chunk_count
    }
}

/// Wait until `predicate` returns true, or panic after `deadline`.
pub async fn wait_until<F: FnMut() -> bool>(mut predicate: F, deadline: Duration, what: &str) {
    let start = std::time::Instant::now();
    loop {
        if predicate() {
            return;
        }
        if start.elapsed() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
