//! Bucketed histograms
//!
//! Percentiles are approximations read off bucket boundaries, good enough
//! for dashboards but not exact order statistics.

use crate::error::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};

/// Ascending, finite upper bounds of a histogram's buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct BucketSet(Vec<f64>);

impl BucketSet {
    /// Validate boundaries: non-empty, finite, strictly ascending
    pub fn new(boundaries: Vec<f64>) -> TelemetryResult<Self> {
        if boundaries.is_empty() {
            return Err(TelemetryError::InvalidBuckets(
                "at least one boundary is required".to_string(),
            ));
        }
        if let Some(bad) = boundaries.iter().find(|b| !b.is_finite()) {
            return Err(TelemetryError::InvalidBuckets(format!(
                "boundary {} is not finite",
                bad
            )));
        }
        if let Some(pair) = boundaries.windows(2).find(|w| w[0] >= w[1]) {
            return Err(TelemetryError::InvalidBuckets(format!(
                "boundaries must be strictly ascending, found {} then {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self(boundaries))
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.0
    }

    /// Generic default, in seconds
    pub fn default_buckets() -> Self {
        Self(vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ])
    }

    /// Latencies and durations in milliseconds
    pub fn latency_ms() -> Self {
        Self(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ])
    }

    /// Signed returns, PnL and slippage in basis points
    pub fn returns_bps() -> Self {
        Self(vec![
            -1000.0, -500.0, -250.0, -100.0, -50.0, -25.0, -10.0, 0.0, 10.0, 25.0, 50.0, 100.0,
            250.0, 500.0, 1000.0,
        ])
    }

    /// Sizes and notional values
    pub fn magnitude() -> Self {
        Self(vec![100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0])
    }

    /// Scores in `[0, 1]`
    pub fn unit_interval() -> Self {
        Self(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0])
    }

    /// Pick a bucket set from conventional substrings of the metric name.
    ///
    /// Only a convenience for unregistered names; registered histograms
    /// always use their own boundaries.
    pub fn for_metric_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("latency") || name.contains("duration") {
            Self::latency_ms()
        } else if name.contains("pnl") || name.contains("return") || name.contains("slippage") {
            Self::returns_bps()
        } else if name.contains("size") || name.contains("value") {
            Self::magnitude()
        } else {
            Self::default_buckets()
        }
    }
}

impl TryFrom<Vec<f64>> for BucketSet {
    type Error = TelemetryError;

    fn try_from(boundaries: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(boundaries)
    }
}

impl From<BucketSet> for Vec<f64> {
    fn from(buckets: BucketSet) -> Self {
        buckets.0
    }
}

/// Summary statistics of one histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Bucket counts for one metric key
///
/// `counts` has one slot per boundary plus a trailing overflow slot, and
/// always sums to `count`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBuckets {
    boundaries: BucketSet,
    counts: Vec<u64>,
    sum_value: f64,
    count: u64,
}

impl HistogramBuckets {
    pub fn new(boundaries: BucketSet) -> Self {
        let slots = boundaries.boundaries().len() + 1;
        Self {
            boundaries,
            counts: vec![0; slots],
            sum_value: 0.0,
            count: 0,
        }
    }

    /// Count `value` in the first bucket whose boundary is `>= value`,
    /// else in the overflow bucket
    pub fn observe(&mut self, value: f64) {
        let slot = self
            .boundaries
            .boundaries()
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.counts.len() - 1);
        self.counts[slot] += 1;
        self.sum_value += value;
        self.count += 1;
    }

    pub fn boundaries(&self) -> &[f64] {
        self.boundaries.boundaries()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum_value
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_value / self.count as f64)
    }

    /// Approximate percentile `p` in `[0, 100]`; `None` when empty.
    ///
    /// Walks cumulative counts to the bucket holding rank `count * p / 100`.
    /// The first bucket reports half its boundary, interior buckets the
    /// midpoint of their bounds, the overflow bucket twice the last boundary.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let bounds = self.boundaries.boundaries();
        let last = bounds.len() - 1;
        let overflow = bounds[last] * 2.0;
        let target = self.count as f64 * p / 100.0;

        let mut cumulative = 0u64;
        for (slot, &n) in self.counts.iter().enumerate() {
            cumulative += n;
            if cumulative as f64 >= target {
                return Some(match slot {
                    0 => bounds[0] / 2.0,
                    s if s <= last => (bounds[s - 1] + bounds[s]) / 2.0,
                    _ => overflow,
                });
            }
        }
        Some(overflow)
    }

    pub fn stats(&self) -> Option<HistogramStats> {
        Some(HistogramStats {
            count: self.count,
            sum: self.sum_value,
            mean: self.mean()?,
            p50: self.percentile(50.0)?,
            p90: self.percentile(90.0)?,
            p95: self.percentile(95.0)?,
            p99: self.percentile(99.0)?,
        })
    }

    /// Fold another histogram with identical boundaries into this one;
    /// returns `false` and leaves `self` untouched otherwise
    pub fn merge(&mut self, other: &HistogramBuckets) -> bool {
        if self.boundaries != other.boundaries {
            return false;
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        self.sum_value += other.sum_value;
        self.count += other.count;
        true
    }
}
