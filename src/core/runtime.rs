//! Runtime orchestration.
//!
//! The runtime coordinates component lifecycle for a single-process
//! deployment backed by the in-memory collaborators:
//! - Start order: storage → coordination → admin consumer → read listener
//! - Shutdown order: read listener → admin consumer → storage
//!
//! Production deployments wire real transports behind the same seams and
//! drive the consumer task and dispatcher directly.

use crate::control::consumer::{AdminConsumerDeps, AdminConsumerTask};
use crate::control::coordination::{MemoryCoordination, StaticLeadership};
use crate::control::executor::LoggingAdminHandler;
use crate::control::log::MemoryAdminLog;
use crate::core::config::Config;
use crate::net::server::ReadServer;
use crate::ops::health::{AlwaysHealthy, DiskHealth};
use crate::ops::metrics::MetricsRegistry;
use crate::schema::registry::MemorySchemaRegistry;
use crate::serve::dispatcher::{ReadDispatcher, ReadDispatcherDeps};
use crate::storage::engine::StorageEngineRepository;
use crate::storage::meta::MemoryMetadata;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    Starting,
    Healthy,
    Stopping,
    Stopped,
}

/// Health aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    pub storage: ComponentHealth,
    pub admin_consumer: ComponentHealth,
    pub read_listener: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            storage: ComponentHealth::Starting,
            admin_consumer: ComponentHealth::Starting,
            read_listener: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Whether the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.storage, self.admin_consumer, self.read_listener),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy
            )
        )
    }
}

/// Strata runtime holding all component handles.
pub struct Runtime {
    config: Arc<Config>,
    metrics: Arc<MetricsRegistry>,
    health: RuntimeHealth,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    engines: Arc<StorageEngineRepository>,
    meta: Arc<MemoryMetadata>,
    registry: Arc<MemorySchemaRegistry>,
    coordination: Arc<MemoryCoordination>,
    leadership: Arc<StaticLeadership>,
    admin_log: Arc<MemoryAdminLog>,
    disk_health: Arc<dyn DiskHealth>,

    consumer: Option<Arc<AdminConsumerTask>>,
    consumer_handle: Option<JoinHandle<()>>,
    listener_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            metrics: Arc::new(MetricsRegistry::new()),
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            engines: Arc::new(StorageEngineRepository::new()),
            meta: Arc::new(MemoryMetadata::new()),
            registry: Arc::new(MemorySchemaRegistry::new()),
            coordination: Arc::new(MemoryCoordination::new()),
            leadership: Arc::new(StaticLeadership::new(true)),
            admin_log: Arc::new(MemoryAdminLog::new()),
            disk_health: Arc::new(AlwaysHealthy),
            consumer: None,
            consumer_handle: None,
            listener_handle: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(cluster = %self.config.cluster.name, "starting Strata runtime");

        self.health.storage = ComponentHealth::Healthy;

        self.start_admin_consumer()?;
        self.start_read_listener().await?;

        self.running.store(true, Ordering::Release);
        tracing::info!("Strata runtime started");
        Ok(())
    }

    fn start_admin_consumer(&mut self) -> Result<()> {
        let consumer = AdminConsumerTask::new(
            &self.config.cluster.name,
            self.config.cluster.parent_controller,
            &self.config.admin,
            AdminConsumerDeps {
                log_consumer: self.admin_log.clone(),
                log_admin: self.admin_log.clone(),
                leadership: self.leadership.clone(),
                handler: Arc::new(LoggingAdminHandler),
                coordination: self.coordination.clone(),
                metrics: self.metrics.clone(),
            },
        );
        self.consumer_handle = Some(tokio::spawn(consumer.clone().run()));
        self.consumer = Some(consumer);
        self.health.admin_consumer = ComponentHealth::Healthy;
        tracing::info!("admin consumer started");
        Ok(())
    }

    async fn start_read_listener(&mut self) -> Result<()> {
        let bind: SocketAddr = self
            .config
            .listener
            .read_bind
            .parse()
            .context("invalid read listener bind address")?;

        let server_configs = serde_json::to_value(self.config.as_ref()).ok();
        let dispatcher = ReadDispatcher::new(
            self.config.serve.clone(),
            ReadDispatcherDeps {
                engines: self.engines.clone(),
                registry: self.registry.clone(),
                meta: self.meta.clone(),
                health: self.disk_health.clone(),
                metrics: self.metrics.clone(),
                server_configs,
            },
        );
        let server = ReadServer::new(dispatcher, self.shutdown_rx.clone());
        self.listener_handle = Some(tokio::spawn(async move {
            if let Err(error) = server.run(bind).await {
                tracing::error!(error = %error, "read listener failed");
            }
        }));
        self.health.read_listener = ComponentHealth::Healthy;
        Ok(())
    }

    /// Run the runtime until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    tracing::error!(error = %error, "signal handler failed");
                }
                tracing::warn!("shutdown signal received");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Strata runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.health.read_listener = ComponentHealth::Stopping;
        if let Some(handle) = self.listener_handle.take() {
            match tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
                Ok(Ok(())) => tracing::info!("read listener stopped"),
                Ok(Err(error)) => tracing::warn!(error = %error, "read listener task panicked"),
                Err(_) => tracing::warn!("read listener stop timed out"),
            }
        }
        self.health.read_listener = ComponentHealth::Stopped;

        self.health.admin_consumer = ComponentHealth::Stopping;
        if let Some(consumer) = self.consumer.take() {
            consumer.stop();
        }
        if let Some(handle) = self.consumer_handle.take() {
            let timeout =
                std::time::Duration::from_millis(self.config.admin.cycle_timeout_ms).max(
                    std::time::Duration::from_secs(1),
                );
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => tracing::info!("admin consumer stopped"),
                Ok(Err(error)) => tracing::warn!(error = %error, "admin consumer task panicked"),
                Err(_) => tracing::warn!("admin consumer stop timed out"),
            }
        }
        self.health.admin_consumer = ComponentHealth::Stopped;

        self.health.storage = ComponentHealth::Stopped;
        tracing::info!("Strata runtime stopped");
        Ok(())
    }
}
