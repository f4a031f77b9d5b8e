//! Metrics registry.
//!
//! Counters, gauges, and latency histograms for the admin consumer and the
//! storage execution path. A series is a metric name plus an optional label
//! set, so hot paths can record per-store or per-request-kind dimensions
//! without pre-registering anything. Latency histograms use fixed
//! logarithmic millisecond buckets sized for storage-node latencies, from
//! sub-millisecond gets up to multi-second admin cycles.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metric names.
pub mod names {
    /// Gauge: first failing admin-log offset, or 0 when nothing is failing.
    pub const ADMIN_FAILED_OFFSET: &str = "strata.admin.consumption_failed_offset";
    /// Gauge: admin operations pending across all problematic stores.
    pub const ADMIN_PENDING_MESSAGES: &str = "strata.admin.pending_messages";
    /// Gauge: number of stores with pending admin operations.
    pub const ADMIN_STORES_WITH_PENDING: &str = "strata.admin.stores_with_pending";
    /// Histogram: duration of one admin execution cycle in milliseconds.
    pub const ADMIN_CYCLE_DURATION_MS: &str = "strata.admin.cycle_duration_ms";
    /// Counter: execution-id gaps reported by data integrity validation.
    pub const ADMIN_DIV_ERROR_TOTAL: &str = "strata.admin.div_error_total";
    /// Counter: admin records that failed consumption.
    pub const ADMIN_FAILED_CONSUMPTION_TOTAL: &str = "strata.admin.failed_consumption_total";
    /// Counter, labeled by `store`: cycles a store ended failed or stalled.
    pub const ADMIN_STORE_FAILURES_TOTAL: &str = "strata.admin.store_failures_total";

    /// Counter, labeled by `kind`: read requests accepted by the dispatcher.
    pub const SERVE_REQUESTS_TOTAL: &str = "strata.serve.requests_total";
    /// Histogram: time a read request waited for a worker, in milliseconds.
    pub const SERVE_SUBMISSION_WAIT_MS: &str = "strata.serve.submission_wait_ms";
    /// Gauge: read requests waiting for a worker.
    pub const SERVE_QUEUE_DEPTH: &str = "strata.serve.queue_depth";
    /// Histogram: storage engine lookup latency in milliseconds.
    pub const SERVE_DB_LOOKUP_MS: &str = "strata.serve.db_lookup_ms";
    /// Histogram: compute evaluation latency in milliseconds.
    pub const SERVE_COMPUTE_MS: &str = "strata.serve.compute_ms";
    /// Histogram: compute result serialization latency in milliseconds.
    pub const SERVE_COMPUTE_SERIALIZE_MS: &str = "strata.serve.compute_serialize_ms";
    /// Counter: dot-product operations evaluated.
    pub const SERVE_OP_DOT_PRODUCT_TOTAL: &str = "strata.serve.op.dot_product_total";
    /// Counter: cosine-similarity operations evaluated.
    pub const SERVE_OP_COSINE_SIMILARITY_TOTAL: &str = "strata.serve.op.cosine_similarity_total";
    /// Counter: hadamard-product operations evaluated.
    pub const SERVE_OP_HADAMARD_PRODUCT_TOTAL: &str = "strata.serve.op.hadamard_product_total";
    /// Counter: count operations evaluated.
    pub const SERVE_OP_COUNT_TOTAL: &str = "strata.serve.op.count_total";
    /// Counter: requests rejected by the early-termination signal.
    pub const SERVE_EARLY_TERMINATION_TOTAL: &str = "strata.serve.early_termination_total";
}

/// Upper bounds of the latency histogram buckets, in milliseconds. Values
/// above the last bound land in an unbounded overflow bucket.
pub const LATENCY_BUCKETS_MS: [f64; 10] =
    [0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 100.0, 500.0, 2_000.0];

/// One series: a metric name plus its sorted label set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug)]
struct LatencyHistogram {
    /// One count per bound in [`LATENCY_BUCKETS_MS`], plus overflow.
    bucket_counts: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bucket_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    fn observe(&self, value_ms: f64) {
        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| value_ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.bucket_counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value_ms.max(0.0) * 1_000.0) as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let buckets = LATENCY_BUCKETS_MS
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .zip(self.bucket_counts.iter())
            .map(|(bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect();
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum_ms: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000.0,
            buckets,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram snapshot.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations, in milliseconds.
    pub sum_ms: f64,
    /// Per-bucket `(upper_bound_ms, count)`; the last bound is infinite.
    pub buckets: Vec<(f64, u64)>,
}

/// Metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<SeriesKey, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<SeriesKey, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<SeriesKey, Arc<LatencyHistogram>>>,
}

/// Get or create the series value for `key`, taking the write lock only on
/// first sight of a series.
fn series<V: Default>(map: &RwLock<HashMap<SeriesKey, Arc<V>>>, key: SeriesKey) -> Arc<V> {
    if let Some(existing) = map.read().get(&key) {
        return existing.clone();
    }
    map.write().entry(key).or_default().clone()
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment an unlabeled counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to an unlabeled counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        self.counter_add_labeled(name, &[], value);
    }

    /// Increment a labeled counter series.
    pub fn counter_inc_labeled(&self, name: &str, labels: &[(&str, &str)]) {
        self.counter_add_labeled(name, labels, 1);
    }

    /// Add to a labeled counter series.
    pub fn counter_add_labeled(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        series(&self.counters, SeriesKey::new(name, labels)).fetch_add(value, Ordering::Relaxed);
    }

    /// Get an unlabeled counter value.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counter_get_labeled(name, &[])
    }

    /// Get a labeled counter series value.
    pub fn counter_get_labeled(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .get(&SeriesKey::new(name, labels))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Set a gauge value.
    pub fn gauge_set(&self, name: &str, value: u64) {
        series(&self.gauges, SeriesKey::new(name, &[])).store(value, Ordering::Relaxed);
    }

    /// Get a gauge value.
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .get(&SeriesKey::new(name, &[]))
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    /// Increment a gauge.
    pub fn gauge_inc(&self, name: &str) {
        series(&self.gauges, SeriesKey::new(name, &[])).fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement a gauge, saturating at zero.
    pub fn gauge_dec(&self, name: &str) {
        let gauge = series(&self.gauges, SeriesKey::new(name, &[]));
        let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some(current.saturating_sub(1))
        });
    }

    /// Record a latency observation in milliseconds.
    pub fn histogram_observe(&self, name: &str, value_ms: f64) {
        series(&self.histograms, SeriesKey::new(name, &[])).observe(value_ms);
    }

    /// Snapshot a histogram, if it has been observed.
    pub fn histogram_get(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms
            .read()
            .get(&SeriesKey::new(name, &[]))
            .map(|h| h.snapshot())
    }

    /// Export all series in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        let mut scalar_lines = |map: &RwLock<HashMap<SeriesKey, Arc<AtomicU64>>>, kind: &str| {
            let map = map.read();
            let mut keys: Vec<&SeriesKey> = map.keys().collect();
            keys.sort();
            let mut last_name = None;
            for key in keys {
                let name = prometheus_name(&key.name);
                if last_name != Some(key.name.as_str()) {
                    out.push_str(&format!("# TYPE {name} {kind}\n"));
                    last_name = Some(key.name.as_str());
                }
                let value = map[key].load(Ordering::Relaxed);
                out.push_str(&format!("{name}{} {value}\n", render_labels(&key.labels)));
            }
        };
        scalar_lines(&self.counters, "counter");
        scalar_lines(&self.gauges, "gauge");

        let histograms = self.histograms.read();
        let mut keys: Vec<&SeriesKey> = histograms.keys().collect();
        keys.sort();
        for key in keys {
            let name = prometheus_name(&key.name);
            let snapshot = histograms[key].snapshot();
            out.push_str(&format!("# TYPE {name} histogram\n"));
            let mut cumulative = 0;
            for (bound, count) in &snapshot.buckets {
                cumulative += count;
                let le = if bound.is_infinite() {
                    "+Inf".to_string()
                } else {
                    format!("{bound}")
                };
                out.push_str(&format!("{name}_bucket{{le=\"{le}\"}} {cumulative}\n"));
            }
            out.push_str(&format!("{name}_sum {}\n", snapshot.sum_ms));
            out.push_str(&format!("{name}_count {}\n", snapshot.count));
        }

        out
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace('.', "_")
}

fn render_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect();
    format!("{{{}}}", rendered.join(","))
}
