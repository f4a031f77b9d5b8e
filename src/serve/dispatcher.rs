//! Read request dispatch.
//!
//! The accepting task never does storage work: router requests are
//! submitted onto one of two bounded worker pools (one for point/batch
//! gets, one for compute) and the response is written by whichever task
//! completes the work. Health checks, dictionary fetches, and server admin
//! introspection are answered directly.
//!
//! The early-termination flag is checked twice, once before queueing and
//! once at task start, so a request the router has abandoned never touches
//! storage. Queue depth and submission wait are attached to each response.

use crate::core::config::ServeConfig;
use crate::core::error::{ReadStatus, StrataError, StrataResult};
use crate::core::version::StoreVersion;
use crate::ops::health::DiskHealth;
use crate::ops::metrics::{names, MetricsRegistry};
use crate::schema::registry::SchemaRegistry;
use crate::serve::compute::{compute_record, ResultSchemaCache};
use crate::serve::partitioner::PartitionResolver;
use crate::serve::request::{
    BatchGetRequest, ComputeRouterRequest, PointGetRequest, ReadRequest, RequestMeta,
    ServerAdminAction,
};
use crate::serve::response::{
    BatchGetRecord, BatchGetResponse, BinaryResponse, ComputeResponse, ComputeResponseRecord,
    PointGetResponse, ReadResponse, ResponseStats, ServerAdminResponse, ShortcutResponse,
};
use crate::serve::scratch::{ScratchPool, ScratchSpace};
use crate::storage::chunking::{
    get_with_adapter, BatchGetAdapter, DecodedRecordAdapter, SingleGetAdapter,
};
use crate::storage::engine::StorageEngineRepository;
use crate::storage::meta::MetadataRetriever;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Collaborators wired into the dispatcher.
pub struct ReadDispatcherDeps {
    pub engines: Arc<StorageEngineRepository>,
    pub registry: Arc<dyn SchemaRegistry>,
    pub meta: Arc<dyn MetadataRetriever>,
    pub health: Arc<dyn DiskHealth>,
    pub metrics: Arc<MetricsRegistry>,
    /// Effective server configuration for the introspection dump.
    pub server_configs: Option<serde_json::Value>,
}

/// Bounded worker pool with a queued-request counter.
struct WorkerPool {
    permits: Arc<Semaphore>,
    queued: AtomicU64,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
            queued: AtomicU64::new(0),
        }
    }

    /// Wait for a worker slot. Returns the permit and the queue depth
    /// observed at task start.
    async fn admit(&self, metrics: &MetricsRegistry) -> StrataResult<(OwnedSemaphorePermit, u64)> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        metrics.gauge_inc(names::SERVE_QUEUE_DEPTH);
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StrataError::internal("worker pool closed"));
        let depth = self.queued.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics.gauge_dec(names::SERVE_QUEUE_DEPTH);
        Ok((permit?, depth))
    }
}

/// The storage execution dispatcher.
pub struct ReadDispatcher {
    config: ServeConfig,
    engines: Arc<StorageEngineRepository>,
    registry: Arc<dyn SchemaRegistry>,
    meta: Arc<dyn MetadataRetriever>,
    health: Arc<dyn DiskHealth>,
    metrics: Arc<MetricsRegistry>,
    resolver: PartitionResolver,
    result_schemas: ResultSchemaCache,
    get_pool: WorkerPool,
    compute_pool: WorkerPool,
    scratch: ScratchPool,
    server_configs: Option<serde_json::Value>,
}

impl ReadDispatcher {
    pub fn new(config: ServeConfig, deps: ReadDispatcherDeps) -> Arc<Self> {
        Arc::new(Self {
            resolver: PartitionResolver::new(deps.meta.clone()),
            result_schemas: ResultSchemaCache::new(),
            get_pool: WorkerPool::new(config.get_pool_size),
            compute_pool: WorkerPool::new(config.compute_pool_size),
            scratch: ScratchPool::new(),
            engines: deps.engines,
            registry: deps.registry,
            meta: deps.meta,
            health: deps.health,
            metrics: deps.metrics,
            server_configs: deps.server_configs,
            config,
        })
    }

    /// Handle one request. Called from the connection task; storage work
    /// runs on the worker pools.
    pub async fn handle(self: &Arc<Self>, request: ReadRequest) -> ReadResponse {
        let kind = match &request {
            ReadRequest::PointGet(_) => "point_get",
            ReadRequest::BatchGet(_) => "batch_get",
            ReadRequest::Compute(_) => "compute",
            ReadRequest::HealthCheck => "health_check",
            ReadRequest::DictionaryFetch { .. } => "dictionary_fetch",
            ReadRequest::ServerAdmin(_) => "server_admin",
        };
        self.metrics
            .counter_inc_labeled(names::SERVE_REQUESTS_TOTAL, &[("kind", kind)]);

        match request {
            ReadRequest::HealthCheck => self.handle_health_check(),
            ReadRequest::DictionaryFetch { resource } => {
                let body = self.meta.compression_dictionary(&resource).unwrap_or_default();
                ReadResponse::Binary(BinaryResponse { body })
            }
            ReadRequest::ServerAdmin(action) => self.handle_server_admin(action),
            ReadRequest::PointGet(request) => {
                let submitted = Instant::now();
                if let Some(shortcut) = self.early_termination(&request.meta, &request.resource) {
                    return shortcut;
                }
                let this = self.clone();
                let handle =
                    tokio::spawn(async move { this.run_point_get(request, submitted).await });
                Self::join(handle.await).map_or_else(
                    |e| ReadResponse::from_error(&e),
                    ReadResponse::PointGet,
                )
            }
            ReadRequest::BatchGet(request) => {
                let submitted = Instant::now();
                if let Some(shortcut) = self.early_termination(&request.meta, &request.resource) {
                    return shortcut;
                }
                let parallel = self.config.parallel_batch_get;
                let this = self.clone();
                let handle = tokio::spawn(async move {
                    if parallel {
                        this.run_batch_get_parallel(request).await
                    } else {
                        this.run_batch_get(request, submitted).await
                    }
                });
                Self::join(handle.await).map_or_else(
                    |e| ReadResponse::from_error(&e),
                    ReadResponse::BatchGet,
                )
            }
            ReadRequest::Compute(request) => {
                let submitted = Instant::now();
                if let Some(shortcut) = self.early_termination(&request.meta, &request.resource) {
                    return shortcut;
                }
                let this = self.clone();
                let handle =
                    tokio::spawn(async move { this.run_compute(request, submitted).await });
                Self::join(handle.await).map_or_else(
                    |e| ReadResponse::from_error(&e),
                    ReadResponse::Compute,
                )
            }
        }
    }

    fn join<T>(
        joined: Result<StrataResult<T>, tokio::task::JoinError>,
    ) -> StrataResult<T> {
        match joined {
            Ok(result) => result,
            Err(e) => Err(StrataError::internal(format!("worker task failed: {e}"))),
        }
    }

    /// Short error response if the deadline tracker already gave up.
    fn early_termination(&self, meta: &RequestMeta, resource: &str) -> Option<ReadResponse> {
        if meta.early_termination.is_triggered() {
            self.metrics.counter_inc(names::SERVE_EARLY_TERMINATION_TOTAL);
            let error = StrataError::EarlyTerminated {
                resource: resource.to_string(),
            };
            return Some(ReadResponse::from_error(&error));
        }
        None
    }

    fn check_early_at_task_start(&self, meta: &RequestMeta, resource: &str) -> StrataResult<()> {
        if meta.early_termination.is_triggered() {
            self.metrics.counter_inc(names::SERVE_EARLY_TERMINATION_TOTAL);
            return Err(StrataError::EarlyTerminated {
                resource: resource.to_string(),
            });
        }
        Ok(())
    }

    fn handle_health_check(&self) -> ReadResponse {
        if self.health.is_healthy() {
            ReadResponse::ok("OK")
        } else {
            tracing::error!(
                error = ?self.health.error_message(),
                "disk health check reports unhealthy storage"
            );
            ReadResponse::Shortcut(ShortcutResponse {
                status: ReadStatus::InternalError,
                message: "storage node hardware is not healthy".to_string(),
            })
        }
    }

    fn handle_server_admin(&self, action: ServerAdminAction) -> ReadResponse {
        match action {
            ServerAdminAction::DumpIngestionState {
                resource,
                partition,
            } => {
                let snapshots = self.meta.ingestion_snapshots(&resource, partition);
                let body = serde_json::to_value(&snapshots).unwrap_or(serde_json::Value::Null);
                ReadResponse::ServerAdmin(ServerAdminResponse {
                    error: false,
                    message: None,
                    body,
                })
            }
            ServerAdminAction::DumpServerConfigs => match &self.server_configs {
                Some(configs) => ReadResponse::ServerAdmin(ServerAdminResponse {
                    error: false,
                    message: None,
                    body: configs.clone(),
                }),
                None => ReadResponse::ServerAdmin(ServerAdminResponse {
                    error: true,
                    message: Some("server config not available".to_string()),
                    body: serde_json::Value::Null,
                }),
            },
        }
    }

    async fn run_point_get(
        self: Arc<Self>,
        request: PointGetRequest,
        submitted: Instant,
    ) -> StrataResult<PointGetResponse> {
        let (_permit, queue_depth) = self.get_pool.admit(&self.metrics).await?;
        let submission_wait_ms = submitted.elapsed().as_secs_f64() * 1_000.0;
        self.metrics
            .histogram_observe(names::SERVE_SUBMISSION_WAIT_MS, submission_wait_ms);
        self.check_early_at_task_start(&request.meta, &request.resource)?;

        let engine = self.engines.local_engine(&request.resource)?;
        let chunked = self.meta.is_store_version_chunked(&request.resource);
        let sub_partition =
            self.resolver
                .sub_partition(&request.resource, request.partition, &request.key);

        let lookup_start = Instant::now();
        let mut adapter = SingleGetAdapter;
        let value = get_with_adapter(
            &mut adapter,
            engine.as_ref(),
            &request.resource,
            sub_partition,
            &request.key,
            chunked,
        )?;
        let db_lookup_ms = lookup_start.elapsed().as_secs_f64() * 1_000.0;
        self.metrics
            .histogram_observe(names::SERVE_DB_LOOKUP_MS, db_lookup_ms);

        let (key_sizes, value_sizes) = if self.config.key_value_profiling {
            let value_size = value.as_ref().map_or(0, |v| v.data.len());
            (Some(vec![request.key.len()]), Some(vec![value_size]))
        } else {
            (None, None)
        };

        Ok(PointGetResponse {
            compression: self.meta.compression_strategy(&request.resource),
            offset: self.meta.offset(&request.resource, sub_partition),
            value,
            key_sizes,
            value_sizes,
            stats: ResponseStats {
                submission_wait_ms,
                queue_depth,
                db_lookup_ms,
                ..ResponseStats::default()
            },
        })
    }

    async fn run_batch_get(
        self: Arc<Self>,
        request: BatchGetRequest,
        submitted: Instant,
    ) -> StrataResult<BatchGetResponse> {
        let (_permit, queue_depth) = self.get_pool.admit(&self.metrics).await?;
        let submission_wait_ms = submitted.elapsed().as_secs_f64() * 1_000.0;
        self.metrics
            .histogram_observe(names::SERVE_SUBMISSION_WAIT_MS, submission_wait_ms);
        self.check_early_at_task_start(&request.meta, &request.resource)?;

        let engine = self.engines.local_engine(&request.resource)?;
        let chunked = self.meta.is_store_version_chunked(&request.resource);
        let profiling = self.config.key_value_profiling;

        let mut records = Vec::with_capacity(request.keys.len());
        let mut sub_partitions = BTreeSet::new();
        let mut key_sizes = profiling.then(|| Vec::with_capacity(request.keys.len()));
        let mut value_sizes = profiling.then(|| Vec::with_capacity(request.keys.len()));

        let lookup_start = Instant::now();
        let mut adapter = BatchGetAdapter;
        for key in &request.keys {
            if let Some(sizes) = key_sizes.as_mut() {
                sizes.push(key.key.len());
            }
            let sub_partition = self
                .resolver
                .sub_partition(&request.resource, key.partition, &key.key);
            sub_partitions.insert(sub_partition);

            let value = get_with_adapter(
                &mut adapter,
                engine.as_ref(),
                &request.resource,
                sub_partition,
                &key.key,
                chunked,
            )?;
            let record = match value {
                Some(value) => Some(BatchGetRecord {
                    key_index: key.key_index,
                    schema_id: value.schema_id,
                    value: value.value,
                }),
                // Streaming responses account for every requested key.
                None if request.meta.streaming => Some(BatchGetRecord::non_existing(key.key_index)),
                None => None,
            };
            if let Some(record) = record {
                if let Some(sizes) = value_sizes.as_mut() {
                    sizes.push(record.value.len());
                }
                records.push(record);
            }
        }
        let db_lookup_ms = lookup_start.elapsed().as_secs_f64() * 1_000.0;
        self.metrics
            .histogram_observe(names::SERVE_DB_LOOKUP_MS, db_lookup_ms);

        Ok(BatchGetResponse {
            partition_offsets: self.partition_offsets(&request.resource, &sub_partitions),
            compression: self.meta.compression_strategy(&request.resource),
            records,
            key_sizes,
            value_sizes,
            stats: ResponseStats {
                submission_wait_ms,
                queue_depth,
                db_lookup_ms,
                ..ResponseStats::default()
            },
        })
    }

    /// Batch get fanned out into chunks of `parallel_chunk_size` keys, each
    /// chunk on its own worker. The response accumulator is guarded by one
    /// lock; the critical section is a single push.
    async fn run_batch_get_parallel(
        self: Arc<Self>,
        request: BatchGetRequest,
    ) -> StrataResult<BatchGetResponse> {
        let chunk_size = self.config.parallel_chunk_size.max(1);
        let resource = request.resource.clone();
        let chunked = self.meta.is_store_version_chunked(&resource);
        let engine = self.engines.local_engine(&resource)?;
        let streaming = request.meta.streaming;

        let records = Arc::new(parking_lot::Mutex::new(Vec::with_capacity(
            request.keys.len(),
        )));
        let sub_partitions = Arc::new(parking_lot::Mutex::new(BTreeSet::new()));

        let mut chunk_tasks = Vec::new();
        for chunk in request.keys.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let this = self.clone();
            let engine = engine.clone();
            let resource = resource.clone();
            let meta = request.meta.clone();
            let records = records.clone();
            let sub_partitions = sub_partitions.clone();
            chunk_tasks.push(tokio::spawn(async move {
                let (_permit, _depth) = this.get_pool.admit(&this.metrics).await?;
                this.check_early_at_task_start(&meta, &resource)?;
                let mut adapter = BatchGetAdapter;
                for key in &chunk {
                    let sub_partition =
                        this.resolver.sub_partition(&resource, key.partition, &key.key);
                    sub_partitions.lock().insert(sub_partition);
                    let value = get_with_adapter(
                        &mut adapter,
                        engine.as_ref(),
                        &resource,
                        sub_partition,
                        &key.key,
                        chunked,
                    )?;
                    let record = match value {
                        Some(value) => Some(BatchGetRecord {
                            key_index: key.key_index,
                            schema_id: value.schema_id,
                            value: value.value,
                        }),
                        None if streaming => Some(BatchGetRecord::non_existing(key.key_index)),
                        None => None,
                    };
                    if let Some(record) = record {
                        records.lock().push(record);
                    }
                }
                Ok::<(), StrataError>(())
            }));
        }
        for task in chunk_tasks {
            Self::join(task.await)?;
        }

        let sub_partitions = std::mem::take(&mut *sub_partitions.lock());
        let records = std::mem::take(&mut *records.lock());
        Ok(BatchGetResponse {
            partition_offsets: self.partition_offsets(&resource, &sub_partitions),
            compression: self.meta.compression_strategy(&resource),
            records,
            key_sizes: None,
            value_sizes: None,
            stats: ResponseStats::default(),
        })
    }

    async fn run_compute(
        self: Arc<Self>,
        request: ComputeRouterRequest,
        submitted: Instant,
    ) -> StrataResult<ComputeResponse> {
        let (_permit, queue_depth) = self.compute_pool.admit(&self.metrics).await?;
        let submission_wait_ms = submitted.elapsed().as_secs_f64() * 1_000.0;
        self.metrics
            .histogram_observe(names::SERVE_SUBMISSION_WAIT_MS, submission_wait_ms);
        self.check_early_at_task_start(&request.meta, &request.resource)?;

        let store = StoreVersion::parse(&request.resource)?.store;
        let value_schema = if request.compute.value_schema_id == -1 {
            self.registry.latest_value_schema(&store)?.schema
        } else {
            self.registry
                .value_schema(&store, request.compute.value_schema_id)?
        };
        let result_schema = self.result_schemas.resolve(
            &request.compute.result_schema,
            &value_schema,
            &request.compute.operations,
        )?;

        let mut space = self.scratch.acquire();
        let result = self.compute_with_scratch(&request, &value_schema, &result_schema, &mut space);
        self.scratch.release(space);

        let (records, sub_partitions, mut stats) = result?;
        stats.submission_wait_ms = submission_wait_ms;
        stats.queue_depth = queue_depth;
        Ok(ComputeResponse {
            partition_offsets: self.partition_offsets(&request.resource, &sub_partitions),
            records,
            stats,
        })
    }

    fn compute_with_scratch(
        &self,
        request: &ComputeRouterRequest,
        value_schema: &Arc<crate::schema::record::RecordSchema>,
        result_schema: &Arc<crate::schema::record::RecordSchema>,
        space: &mut ScratchSpace,
    ) -> StrataResult<(Vec<ComputeResponseRecord>, BTreeSet<u32>, ResponseStats)> {
        let engine = self.engines.local_engine(&request.resource)?;
        let chunked = self.meta.is_store_version_chunked(&request.resource);
        let scratch = space.for_compute(value_schema, result_schema);

        let mut records = Vec::with_capacity(request.keys.len());
        let mut sub_partitions = BTreeSet::new();
        let mut stats = ResponseStats::default();

        for key in &request.keys {
            scratch.result_record.clear();
            let sub_partition = self
                .resolver
                .sub_partition(&request.resource, key.partition, &key.key);
            sub_partitions.insert(sub_partition);

            let lookup_start = Instant::now();
            let mut adapter = DecodedRecordAdapter {
                record: &mut *scratch.value_record,
                decoder: &mut *scratch.decoder,
            };
            let found = get_with_adapter(
                &mut adapter,
                engine.as_ref(),
                &request.resource,
                sub_partition,
                &key.key,
                chunked,
            )?
            .is_some();
            stats.db_lookup_ms += lookup_start.elapsed().as_secs_f64() * 1_000.0;

            if !found {
                if request.meta.streaming {
                    records.push(ComputeResponseRecord::non_existing(key.key_index));
                }
                continue;
            }

            let compute_start = Instant::now();
            compute_record(
                &request.compute.operations,
                scratch.value_record,
                scratch.result_record,
                &self.metrics,
            )?;
            let compute_ms = compute_start.elapsed().as_secs_f64() * 1_000.0;
            stats.compute_ms += compute_ms;
            self.metrics
                .histogram_observe(names::SERVE_COMPUTE_MS, compute_ms);

            let serialize_start = Instant::now();
            scratch
                .serializer
                .serialize_into(scratch.result_record, scratch.buffer)?;
            let serialize_ms = serialize_start.elapsed().as_secs_f64() * 1_000.0;
            stats.compute_serialize_ms += serialize_ms;
            self.metrics
                .histogram_observe(names::SERVE_COMPUTE_SERIALIZE_MS, serialize_ms);

            records.push(ComputeResponseRecord {
                key_index: key.key_index,
                value: Bytes::copy_from_slice(scratch.buffer),
            });
        }
        self.metrics
            .histogram_observe(names::SERVE_DB_LOOKUP_MS, stats.db_lookup_ms);

        Ok((records, sub_partitions, stats))
    }

    fn partition_offsets(
        &self,
        resource: &str,
        sub_partitions: &BTreeSet<u32>,
    ) -> Vec<(u32, u64)> {
        sub_partitions
            .iter()
            .map(|p| (*p, self.meta.offset(resource, *p).unwrap_or(0)))
            .collect()
    }
}
