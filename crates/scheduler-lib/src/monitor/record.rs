//! Per-resource usage record and the statistics derived from it

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ResourceType;

/// Shortest window used for operation rates, avoids dividing by ~0
const MIN_RATE_WINDOW_SECS: f64 = 0.001;

/// Latest reading, peak and operation counters of one resource
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub resource_type: ResourceType,
    /// Fraction in the resource's valid range
    pub used_amount: f64,
    /// Highest reading since construction or the last reset
    pub peak_amount: f64,
    /// Time of the latest reading; `None` until the first one
    pub timestamp: Option<DateTime<Utc>>,
    pub operations_total: u64,
    /// Operations per second over the last update window
    pub operation_rate: f64,
    #[serde(skip)]
    window_operations: u64,
    #[serde(skip)]
    history: VecDeque<f64>,
}

impl UsageRecord {
    pub(crate) fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            used_amount: 0.0,
            peak_amount: 0.0,
            timestamp: None,
            operations_total: 0,
            operation_rate: 0.0,
            window_operations: 0,
            history: VecDeque::new(),
        }
    }

    pub fn has_reading(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Mean over the retained history
    pub fn average(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f64>() / self.history.len() as f64
    }

    pub fn samples(&self) -> usize {
        self.history.len()
    }

    /// Store a clamped reading and return the one it replaces
    pub(crate) fn apply(&mut self, value: f64, history_size: usize) -> f64 {
        let previous = self.used_amount;
        self.used_amount = value;
        self.peak_amount = self.peak_amount.max(value);
        self.timestamp = Some(Utc::now());

        self.history.push_back(value);
        while self.history.len() > history_size {
            self.history.pop_front();
        }
        previous
    }

    pub(crate) fn add_operations(&mut self, amount: u64) {
        self.window_operations = self.window_operations.saturating_add(amount);
        self.operations_total = self.operations_total.saturating_add(amount);
    }

    /// Compute the rate of the window that just ended and start a new one
    ///
    /// Returns the rate when any operation was recorded in the window.
    pub(crate) fn close_window(&mut self, elapsed_secs: f64) -> Option<f64> {
        let ops = std::mem::take(&mut self.window_operations);
        self.operation_rate = ops as f64 / elapsed_secs.max(MIN_RATE_WINDOW_SECS);
        (ops > 0).then_some(self.operation_rate)
    }

    /// Drop history and counters; the peak restarts from the current reading
    pub(crate) fn reset(&mut self) {
        self.peak_amount = self.used_amount;
        self.history.clear();
        self.operations_total = 0;
        self.window_operations = 0;
        self.operation_rate = 0.0;
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            resource_type: self.resource_type,
            used: self.used_amount,
            peak: self.peak_amount,
            average: self.average(),
            samples: self.samples(),
            operations_total: self.operations_total,
            operation_rate: self.operation_rate,
            last_sample_at: self.timestamp,
        }
    }
}

/// Point-in-time statistics of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub resource_type: ResourceType,
    pub used: f64,
    pub peak: f64,
    pub average: f64,
    pub samples: usize,
    pub operations_total: u64,
    pub operation_rate: f64,
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// Statistics of every tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub running: bool,
    /// Completed update passes
    pub updates: u64,
    pub resources: Vec<ResourceStats>,
}

impl StatsSnapshot {
    pub fn resource(&self, resource: ResourceType) -> Option<&ResourceStats> {
        self.resources.iter().find(|r| r.resource_type == resource)
    }
}
