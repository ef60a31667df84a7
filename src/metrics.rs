//! Internal observability metrics for rProm-Adapter
//!
//! This module tracks the adapter's own operation and renders it in the
//! Prometheus text exposition format for `GET /metrics`.
//!
//! # Metrics
//!
//! ## Discovery
//! - `rprom_discovery_runs_total` - Counter of discovery passes
//! - `rprom_discovery_group_failures_total{series_query="..."}` - Counter of failed series queries
//! - `rprom_discovery_duration_seconds` - Histogram of discovery pass durations
//! - `rprom_discovery_series_skipped_total` - Counter of series skipped by mapping errors
//! - `rprom_discovery_conflicts_total` - Counter of series or metric names claimed by more than one rule
//! - `rprom_catalog_metrics` - Gauge of available (resource, metric) pairs
//!
//! ## API
//! - `rprom_metric_requests_total` - Counter of metric value requests
//! - `rprom_metric_request_errors_total` - Counter of failed metric value requests
//!
//! ## Config
//! - `rprom_config_reload_total{result="success|failure"}` - Counter of config reloads
//! - `rprom_config_last_reload_timestamp` - Timestamp of last successful config reload

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rules::DiscoveryStats;

/// Default histogram buckets for discovery duration (in seconds)
pub const DEFAULT_HISTOGRAM_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Thread-safe counter using atomic operations
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter initialized to 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe gauge using atomic operations
#[derive(Debug, Default)]
pub struct Gauge {
    /// Stored as bits of f64 for atomic operations
    value: AtomicU64,
}

impl Gauge {
    /// Create a new gauge initialized to 0
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0.0_f64.to_bits()),
        }
    }

    /// Set the gauge to a specific value
    pub fn set(&self, v: f64) {
        self.value.store(v.to_bits(), Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }

    /// Set the gauge to the current Unix timestamp
    pub fn set_to_current_time(&self) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.set(timestamp);
    }
}

/// Thread-safe histogram for measuring distributions
#[derive(Debug)]
pub struct Histogram {
    /// Bucket boundaries (upper bounds), ending with +Inf
    buckets: Vec<f64>,
    /// Cumulative bucket counters
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given bucket boundaries
    pub fn new(buckets: &[f64]) -> Self {
        let mut sorted_buckets: Vec<f64> = buckets.to_vec();
        sorted_buckets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        if sorted_buckets.last().map_or(true, |v| !v.is_infinite()) {
            sorted_buckets.push(f64::INFINITY);
        }

        let bucket_counts = (0..sorted_buckets.len())
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            buckets: sorted_buckets,
            bucket_counts,
            sum: AtomicU64::new(0.0_f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    /// Observe a value
    pub fn observe(&self, v: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        loop {
            let current = self.sum.load(Ordering::Relaxed);
            let new = f64::from_bits(current) + v;
            if self
                .sum
                .compare_exchange_weak(current, new.to_bits(), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        for (i, &bound) in self.buckets.iter().enumerate() {
            if v <= bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get the sum of all observations
    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Get the total count of observations
    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get bucket boundaries and their cumulative counts
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .zip(self.bucket_counts.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_BUCKETS)
    }
}

/// Adapter metrics registry
///
/// Shared behind an `Arc` by the provider and the HTTP handlers.
#[derive(Debug)]
pub struct AdapterMetrics {
    pub discovery_runs_total: Counter,
    pub discovery_duration_seconds: Histogram,
    pub series_skipped_total: Counter,
    pub conflicts_total: Counter,
    pub catalog_metrics: Gauge,
    pub metric_requests_total: Counter,
    pub metric_request_errors_total: Counter,
    pub reload_success_total: Counter,
    pub reload_failure_total: Counter,
    pub last_reload_timestamp: Gauge,
    /// Failed series queries, keyed by `seriesQuery`
    group_failures: RwLock<BTreeMap<String, u64>>,
}

impl Default for AdapterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterMetrics {
    /// Create a new registry; the initial config load counts as a reload
    pub fn new() -> Self {
        let metrics = Self {
            discovery_runs_total: Counter::new(),
            discovery_duration_seconds: Histogram::default(),
            series_skipped_total: Counter::new(),
            conflicts_total: Counter::new(),
            catalog_metrics: Gauge::new(),
            metric_requests_total: Counter::new(),
            metric_request_errors_total: Counter::new(),
            reload_success_total: Counter::new(),
            reload_failure_total: Counter::new(),
            last_reload_timestamp: Gauge::new(),
            group_failures: RwLock::new(BTreeMap::new()),
        };
        metrics.last_reload_timestamp.set_to_current_time();
        metrics
    }

    /// Record one finished discovery pass
    pub fn record_discovery(&self, stats: &DiscoveryStats, catalog_size: usize, duration_seconds: f64) {
        self.discovery_runs_total.inc();
        self.discovery_duration_seconds.observe(duration_seconds);
        self.series_skipped_total.inc_by(stats.series_skipped as u64);
        self.conflicts_total.inc_by(stats.conflicts as u64);
        self.catalog_metrics.set(catalog_size as f64);
    }

    /// Record a failed series query
    pub fn record_group_failure(&self, series_query: &str) {
        let mut failures = self
            .group_failures
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *failures.entry(series_query.to_string()).or_insert(0) += 1;
    }

    /// Failure count for one series query
    pub fn group_failures(&self, series_query: &str) -> u64 {
        self.group_failures
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(series_query)
            .copied()
            .unwrap_or(0)
    }

    /// Drop failure counts for series queries the predicate rejects
    pub fn retain_group_failures<F>(&self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.group_failures
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|series_query, _| keep(series_query));
    }

    /// Record a config reload attempt
    pub fn record_reload(&self, success: bool) {
        if success {
            self.reload_success_total.inc();
            self.last_reload_timestamp.set_to_current_time();
        } else {
            self.reload_failure_total.inc();
        }
    }

    /// Render all metrics in Prometheus exposition format
    pub fn render(&self) -> String {
        let mut out = String::new();

        write_single(
            &mut out,
            "rprom_discovery_runs_total",
            "counter",
            "Total number of discovery passes",
            self.discovery_runs_total.get() as f64,
        );

        write_header(
            &mut out,
            "rprom_discovery_group_failures_total",
            "counter",
            "Total number of failed series queries",
        );
        {
            let failures = self
                .group_failures
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (query, count) in failures.iter() {
                let _ = writeln!(
                    out,
                    "rprom_discovery_group_failures_total{{series_query=\"{}\"}} {}",
                    escape_label_value(query),
                    count
                );
            }
        }

        let histogram = &self.discovery_duration_seconds;
        write_header(
            &mut out,
            "rprom_discovery_duration_seconds",
            "histogram",
            "Histogram of discovery pass durations",
        );
        for (bound, count) in histogram.get_buckets() {
            let le = if bound.is_infinite() {
                "+Inf".to_string()
            } else {
                bound.to_string()
            };
            let _ = writeln!(
                out,
                "rprom_discovery_duration_seconds_bucket{{le=\"{}\"}} {}",
                le, count
            );
        }
        let _ = writeln!(out, "rprom_discovery_duration_seconds_sum {}", histogram.get_sum());
        let _ = writeln!(
            out,
            "rprom_discovery_duration_seconds_count {}",
            histogram.get_count()
        );

        write_single(
            &mut out,
            "rprom_discovery_series_skipped_total",
            "counter",
            "Total number of series skipped because of mapping errors",
            self.series_skipped_total.get() as f64,
        );
        write_single(
            &mut out,
            "rprom_discovery_conflicts_total",
            "counter",
            "Total number of series or metric names claimed by more than one rule",
            self.conflicts_total.get() as f64,
        );
        write_single(
            &mut out,
            "rprom_catalog_metrics",
            "gauge",
            "Number of available (resource, metric) pairs",
            self.catalog_metrics.get(),
        );
        write_single(
            &mut out,
            "rprom_metric_requests_total",
            "counter",
            "Total number of metric value requests",
            self.metric_requests_total.get() as f64,
        );
        write_single(
            &mut out,
            "rprom_metric_request_errors_total",
            "counter",
            "Total number of failed metric value requests",
            self.metric_request_errors_total.get() as f64,
        );

        write_header(
            &mut out,
            "rprom_config_reload_total",
            "counter",
            "Total number of configuration reloads",
        );
        let _ = writeln!(
            out,
            "rprom_config_reload_total{{result=\"success\"}} {}",
            self.reload_success_total.get()
        );
        let _ = writeln!(
            out,
            "rprom_config_reload_total{{result=\"failure\"}} {}",
            self.reload_failure_total.get()
        );

        write_single(
            &mut out,
            "rprom_config_last_reload_timestamp",
            "gauge",
            "Unix timestamp of the last successful configuration reload",
            self.last_reload_timestamp.get(),
        );

        out
    }
}

fn write_header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

fn write_single(out: &mut String, name: &str, kind: &str, help: &str, value: f64) {
    write_header(out, name, kind, help);
    let _ = writeln!(out, "{} {}", name, value);
}

/// Escape a label value for the exposition format
fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
