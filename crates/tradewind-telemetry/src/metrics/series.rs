//! Bounded time series

use super::collector::MetricValue;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// FIFO series of points; once full, each push evicts the oldest point
#[derive(Debug, Clone)]
pub struct TimeSeries {
    points: VecDeque<MetricValue>,
    capacity: usize,
}

impl TimeSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, point: MetricValue) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&MetricValue> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricValue> {
        self.points.iter()
    }

    /// Points at or after `since`, oldest first
    pub fn since(&self, since: Option<DateTime<Utc>>) -> Vec<MetricValue> {
        self.points
            .iter()
            .filter(|p| since.is_none_or(|t| p.timestamp >= t))
            .cloned()
            .collect()
    }
}
