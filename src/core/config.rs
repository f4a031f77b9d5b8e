//! Configuration parsing and validation.
//!
//! Strata configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the two halves of the system: `[admin]` configures the
//! controller-side admin log consumer, `[serve]` the storage execution
//! handler, plus shared `[cluster]`, `[listener]`, `[telemetry]`, and
//! `[paths]` sections.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Strata configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster identity.
    pub cluster: ClusterConfig,

    /// Admin log consumer configuration.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Storage execution handler configuration.
    #[serde(default)]
    pub serve: ServeConfig,

    /// Network listener configuration.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathConfig,
}

/// Cluster identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name. Namespaces the admin topic and coordination keys.
    pub name: String,

    /// Whether this process is the top-level (parent) controller.
    ///
    /// Only the parent controller creates the admin topic; child
    /// controllers wait for it to appear.
    #[serde(default)]
    pub parent_controller: bool,
}

/// Admin log consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Delay between consumption cycles in milliseconds.
    #[serde(default = "default_read_cycle_delay_ms")]
    pub read_cycle_delay_ms: u64,

    /// Collective timeout for one execution cycle across all per-store
    /// tasks, in milliseconds.
    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,

    /// Maximum number of concurrent per-store execution workers.
    #[serde(default = "default_max_worker_pool_size")]
    pub max_worker_pool_size: usize,

    /// Replication factor used when the parent controller creates the
    /// admin topic.
    #[serde(default = "default_topic_replication_factor")]
    pub topic_replication_factor: u32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            read_cycle_delay_ms: default_read_cycle_delay_ms(),
            cycle_timeout_ms: default_cycle_timeout_ms(),
            max_worker_pool_size: default_max_worker_pool_size(),
            topic_replication_factor: default_topic_replication_factor(),
        }
    }
}

/// Storage execution handler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Worker pool size for single-get and batch-get requests.
    #[serde(default = "default_get_pool_size")]
    pub get_pool_size: usize,

    /// Worker pool size for compute requests.
    #[serde(default = "default_compute_pool_size")]
    pub compute_pool_size: usize,

    /// Whether to fan batch-get requests out into parallel key chunks.
    #[serde(default)]
    pub parallel_batch_get: bool,

    /// Number of keys per parallel batch-get chunk.
    #[serde(default = "default_parallel_chunk_size")]
    pub parallel_chunk_size: usize,

    /// Whether to attach per-key key/value size lists to responses.
    #[serde(default)]
    pub key_value_profiling: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            get_pool_size: default_get_pool_size(),
            compute_pool_size: default_compute_pool_size(),
            parallel_batch_get: false,
            parallel_chunk_size: default_parallel_chunk_size(),
            key_value_profiling: false,
        }
    }
}

/// Network listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address for the read-path listener.
    #[serde(default = "default_read_bind")]
    pub read_bind: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_bind: default_read_bind(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Filesystem path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Data directory for locally materialized state.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// Default value functions

fn default_read_cycle_delay_ms() -> u64 {
    1_000
}

fn default_cycle_timeout_ms() -> u64 {
    120_000
}

fn default_max_worker_pool_size() -> usize {
    10
}

fn default_topic_replication_factor() -> u32 {
    3
}

fn default_get_pool_size() -> usize {
    8
}

fn default_compute_pool_size() -> usize {
    8
}

fn default_parallel_chunk_size() -> usize {
    32
}

fn default_read_bind() -> String {
    "127.0.0.1:7070".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref data_dir) = overrides.data_dir {
            self.paths.data_dir = data_dir.clone();
        }
        if let Some(ref read_bind) = overrides.read_bind {
            self.listener.read_bind = read_bind.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_cluster()?;
        self.validate_admin()?;
        self.validate_serve()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_cluster(&self) -> Result<()> {
        if self.cluster.name.is_empty() {
            anyhow::bail!("cluster.name must not be empty");
        }
        Ok(())
    }

    fn validate_admin(&self) -> Result<()> {
        if self.admin.max_worker_pool_size == 0 {
            anyhow::bail!("admin.max_worker_pool_size must be > 0");
        }
        if self.admin.cycle_timeout_ms == 0 {
            anyhow::bail!("admin.cycle_timeout_ms must be > 0");
        }
        if self.admin.topic_replication_factor == 0 {
            anyhow::bail!("admin.topic_replication_factor must be > 0");
        }
        Ok(())
    }

    fn validate_serve(&self) -> Result<()> {
        if self.serve.get_pool_size == 0 {
            anyhow::bail!("serve.get_pool_size must be > 0");
        }
        if self.serve.compute_pool_size == 0 {
            anyhow::bail!("serve.compute_pool_size must be > 0");
        }
        if self.serve.parallel_batch_get && self.serve.parallel_chunk_size == 0 {
            anyhow::bail!("serve.parallel_chunk_size must be > 0 when parallel_batch_get is set");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override data directory.
    pub data_dir: Option<String>,
    /// Override read listener bind address.
    pub read_bind: Option<String>,
}
