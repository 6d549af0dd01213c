//! Metrics collection and aggregation
//!
//! One lock guards every store (counters, gauges, histograms, time series);
//! each public call is a short critical section with no I/O inside.

use super::histogram::{BucketSet, HistogramBuckets, HistogramStats};
use super::key::MetricKey;
use super::series::TimeSeries;
use crate::config::MetricsConfig;
use crate::error::{TelemetryError, TelemetryResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Metric type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Counter (monotonically increasing)
    Counter,
    /// Gauge (can go up or down)
    Gauge,
    /// Histogram (distribution of values)
    Histogram,
    /// Summary (percentiles)
    Summary,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
        };
        f.write_str(s)
    }
}

/// Registration record for a metric name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub metric_type: MetricType,
    pub description: String,
    pub unit: String,
    /// Declared label names; informational, not checked on write
    pub labels: Vec<String>,
    /// Fixed boundaries for histograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<BucketSet>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, metric_type: MetricType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_type,
            description: description.into(),
            unit: String::new(),
            labels: Vec::new(),
            buckets: None,
        }
    }

    pub fn counter(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, MetricType::Counter, description)
    }

    pub fn gauge(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, MetricType::Gauge, description)
    }

    pub fn histogram(name: impl Into<String>, description: impl Into<String>, buckets: BucketSet) -> Self {
        Self::new(name, MetricType::Histogram, description).with_buckets(buckets)
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_buckets(mut self, buckets: BucketSet) -> Self {
        self.buckets = Some(buckets);
        self
    }
}

/// One recorded value: latest gauge snapshot or a time series point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
}

/// Gauge entry of a [`MetricsSummary`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeSnapshot {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Full dump of the collector, keyed by `name{k=v,...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub timestamp: DateTime<Utc>,
    pub counters: BTreeMap<String, f64>,
    pub gauges: BTreeMap<String, GaugeSnapshot>,
    pub histograms: BTreeMap<String, HistogramStats>,
}

/// Everything behind the collector's lock
#[derive(Debug)]
pub(crate) struct MetricStore {
    config: MetricsConfig,
    definitions: BTreeMap<String, MetricDefinition>,
    counters: HashMap<MetricKey, f64>,
    gauges: HashMap<MetricKey, MetricValue>,
    histograms: HashMap<MetricKey, HistogramBuckets>,
    gauge_series: HashMap<MetricKey, TimeSeries>,
    observation_series: HashMap<MetricKey, TimeSeries>,
}

impl MetricStore {
    fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            definitions: BTreeMap::new(),
            counters: HashMap::new(),
            gauges: HashMap::new(),
            histograms: HashMap::new(),
            gauge_series: HashMap::new(),
            observation_series: HashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, definition: MetricDefinition) -> TelemetryResult<()> {
        if let Some(existing) = self.definitions.get(&definition.name) {
            if existing.metric_type != definition.metric_type {
                warn!(
                    metric = %definition.name,
                    registered = %existing.metric_type,
                    requested = %definition.metric_type,
                    "Metric already registered with another type"
                );
                return Err(TelemetryError::MetricTypeConflict {
                    name: definition.name,
                    registered: existing.metric_type.to_string(),
                    requested: definition.metric_type.to_string(),
                });
            }
        }
        if definition.metric_type == MetricType::Histogram {
            self.rebucket(&definition)?;
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Boundaries can only change while no series of the name holds observations
    fn rebucket(&mut self, definition: &MetricDefinition) -> TelemetryResult<()> {
        let requested = definition
            .buckets
            .clone()
            .unwrap_or_else(|| self.inferred_buckets(&definition.name));
        let conflicting = self.histograms.iter().any(|(key, histogram)| {
            key.name() == definition.name
                && histogram.count() > 0
                && histogram.boundaries() != requested.boundaries()
        });
        if conflicting {
            warn!(
                metric = %definition.name,
                "Histogram already has observations with other boundaries"
            );
            return Err(TelemetryError::InvalidBuckets(format!(
                "'{}' already has observations with other boundaries",
                definition.name
            )));
        }
        // empty shells still carry the old boundaries
        self.histograms
            .retain(|key, histogram| key.name() != definition.name || histogram.count() > 0);
        self.insert_shell(definition);
        Ok(())
    }

    fn insert_shell(&mut self, definition: &MetricDefinition) {
        let buckets = definition
            .buckets
            .clone()
            .unwrap_or_else(|| self.inferred_buckets(&definition.name));
        self.histograms
            .entry(MetricKey::new(&definition.name, &[]))
            .or_insert_with(|| HistogramBuckets::new(buckets));
    }

    fn inferred_buckets(&self, name: &str) -> BucketSet {
        if self.config.infer_buckets_from_name {
            BucketSet::for_metric_name(name)
        } else {
            BucketSet::default_buckets()
        }
    }

    fn buckets_for(&self, name: &str) -> BucketSet {
        match self.definitions.get(name).and_then(|d| d.buckets.clone()) {
            Some(buckets) => buckets,
            None => self.inferred_buckets(name),
        }
    }

    /// Writes of one kind to a name registered as another kind are dropped
    fn accepts(&self, name: &str, kind: MetricType) -> bool {
        match self.definitions.get(name) {
            Some(def) if def.metric_type != kind => {
                warn!(
                    metric = name,
                    registered = %def.metric_type,
                    requested = %kind,
                    "Dropping write with mismatched metric type"
                );
                false
            }
            _ => true,
        }
    }

    pub(crate) fn increment(&mut self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if !value.is_finite() || value < 0.0 {
            warn!(metric = name, value, "Dropping negative or non-finite counter increment");
            return;
        }
        if !self.accepts(name, MetricType::Counter) {
            return;
        }
        *self.counters.entry(MetricKey::new(name, labels)).or_insert(0.0) += value;
    }

    pub(crate) fn set_gauge(&mut self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if !self.accepts(name, MetricType::Gauge) {
            return;
        }
        let key = MetricKey::new(name, labels);
        let point = MetricValue {
            value,
            timestamp: Utc::now(),
            labels: key.label_map(),
        };
        let capacity = self.config.gauge_series_capacity;
        self.gauge_series
            .entry(key.clone())
            .or_insert_with(|| TimeSeries::new(capacity))
            .push(point.clone());
        self.gauges.insert(key, point);
    }

    pub(crate) fn observe(&mut self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if !value.is_finite() {
            warn!(metric = name, value, "Dropping non-finite observation");
            return;
        }
        if !self.accepts(name, MetricType::Histogram) {
            return;
        }
        let key = MetricKey::new(name, labels);
        if !self.histograms.contains_key(&key) {
            let buckets = self.buckets_for(name);
            self.histograms
                .insert(key.clone(), HistogramBuckets::new(buckets));
        }
        if let Some(histogram) = self.histograms.get_mut(&key) {
            histogram.observe(value);
        }

        let capacity = self.config.observation_series_capacity;
        let point = MetricValue {
            value,
            timestamp: Utc::now(),
            labels: key.label_map(),
        };
        self.observation_series
            .entry(key)
            .or_insert_with(|| TimeSeries::new(capacity))
            .push(point);
    }

    pub(crate) fn counter(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.counters
            .get(&MetricKey::new(name, labels))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of every counter series of `name` matching `filter`
    pub(crate) fn counter_total(&self, name: &str, filter: &[(&str, &str)]) -> f64 {
        self.counters
            .iter()
            .filter(|(key, _)| key.matches(name, filter))
            .map(|(_, v)| v)
            .sum()
    }

    /// Counter totals of `name` grouped by the value of label `by`
    pub(crate) fn counter_by_label(&self, name: &str, by: &str) -> BTreeMap<String, f64> {
        let mut grouped = BTreeMap::new();
        for (key, value) in self.counters.iter().filter(|(key, _)| key.name() == name) {
            if let Some(label) = key.label(by) {
                *grouped.entry(label.to_string()).or_insert(0.0) += value;
            }
        }
        grouped
    }

    pub(crate) fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges
            .get(&MetricKey::new(name, labels))
            .map(|point| point.value)
    }

    pub(crate) fn histogram_stats(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramStats> {
        self.histograms
            .get(&MetricKey::new(name, labels))
            .and_then(HistogramBuckets::stats)
    }

    /// Stats over every histogram series of `name` matching `filter`
    pub(crate) fn merged_histogram_stats(&self, name: &str, filter: &[(&str, &str)]) -> Option<HistogramStats> {
        let mut merged: Option<HistogramBuckets> = None;
        for (key, histogram) in self.histograms.iter().filter(|(key, _)| key.matches(name, filter)) {
            if histogram.count() == 0 {
                continue;
            }
            match merged.as_mut() {
                None => merged = Some(histogram.clone()),
                Some(acc) => {
                    if !acc.merge(histogram) {
                        debug!(key = %key, "Skipping histogram with different boundaries");
                    }
                }
            }
        }
        merged.and_then(|h| h.stats())
    }

    fn time_series(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        since: Option<DateTime<Utc>>,
    ) -> Vec<MetricValue> {
        let key = MetricKey::new(name, labels);
        self.gauge_series
            .get(&key)
            .or_else(|| self.observation_series.get(&key))
            .map(|series| series.since(since))
            .unwrap_or_default()
    }

    fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            timestamp: Utc::now(),
            counters: self
                .counters
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
            gauges: self
                .gauges
                .iter()
                .map(|(key, point)| {
                    (
                        key.to_string(),
                        GaugeSnapshot {
                            value: point.value,
                            timestamp: point.timestamp,
                        },
                    )
                })
                .collect(),
            histograms: self
                .histograms
                .iter()
                .filter_map(|(key, h)| h.stats().map(|stats| (key.to_string(), stats)))
                .collect(),
        }
    }

    fn reset(&mut self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.clear();
        self.gauge_series.clear();
        self.observation_series.clear();
        let shells: Vec<MetricDefinition> = self
            .definitions
            .values()
            .filter(|d| d.metric_type == MetricType::Histogram)
            .cloned()
            .collect();
        for definition in &shells {
            self.insert_shell(definition);
        }
    }
}

/// Metrics collector
///
/// Construct one and pass it to collaborators; [`global_metrics`] exists for
/// code that cannot take an instance yet.
#[derive(Debug)]
pub struct MetricsCollector {
    pub(crate) store: Mutex<MetricStore>,
}

impl MetricsCollector {
    /// Create a collector with the trading metrics pre-registered
    pub fn new(config: MetricsConfig) -> Self {
        let mut store = MetricStore::new(config);
        super::trading::register_domain_metrics(&mut store);
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn config(&self) -> MetricsConfig {
        self.store.lock().config.clone()
    }

    /// Register a metric definition.
    ///
    /// Re-registering with the same type replaces the definition; a different
    /// type is rejected and the first definition kept.
    pub fn register(&self, definition: MetricDefinition) -> TelemetryResult<()> {
        self.store.lock().register(definition)
    }

    /// Register a histogram with fixed bucket boundaries
    pub fn register_histogram(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        buckets: BucketSet,
    ) -> TelemetryResult<()> {
        self.register(MetricDefinition::histogram(name, description, buckets).with_unit(unit))
    }

    /// Registered definitions, sorted by name
    pub fn definitions(&self) -> Vec<MetricDefinition> {
        self.store.lock().definitions.values().cloned().collect()
    }

    /// Add 1 to a counter
    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.increment_by(name, 1.0, labels);
    }

    /// Add `value` to a counter, creating it at zero; negative or non-finite
    /// values are dropped
    pub fn increment_by(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.store.lock().increment(name, value, labels);
    }

    pub fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.store.lock().set_gauge(name, value, labels);
    }

    /// Record one histogram observation
    pub fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.store.lock().observe(name, value, labels);
    }

    /// Counter value, 0 when never incremented
    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        self.store.lock().counter(name, labels)
    }

    pub fn get_gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.store.lock().gauge(name, labels)
    }

    /// Histogram statistics; `None` until something was observed
    pub fn get_histogram_stats(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramStats> {
        self.store.lock().histogram_stats(name, labels)
    }

    /// Gauge or observation series for a key, oldest first
    pub fn get_time_series(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        since: Option<DateTime<Utc>>,
    ) -> Vec<MetricValue> {
        self.store.lock().time_series(name, labels, since)
    }

    pub fn get_summary(&self) -> MetricsSummary {
        self.store.lock().summary()
    }

    /// Clear all recorded data, keeping definitions and histogram shells
    pub fn reset(&self) {
        self.store.lock().reset();
        debug!("Metrics collector reset");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_METRICS: RwLock<Option<Arc<MetricsCollector>>> = RwLock::new(None);
}

/// Process-wide default collector, created on first use
pub fn global_metrics() -> Arc<MetricsCollector> {
    if let Some(metrics) = GLOBAL_METRICS.read().as_ref() {
        return metrics.clone();
    }
    GLOBAL_METRICS
        .write()
        .get_or_insert_with(|| Arc::new(MetricsCollector::default()))
        .clone()
}

/// Replace the process-wide default collector, returning the previous one
pub fn set_global_metrics(metrics: Arc<MetricsCollector>) -> Option<Arc<MetricsCollector>> {
    GLOBAL_METRICS.write().replace(metrics)
}
