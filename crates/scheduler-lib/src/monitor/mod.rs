//! Resource usage monitoring
//!
//! The [`ResourceMonitor`] pulls readings from a [`UsageSource`], keeps one
//! [`UsageRecord`] per resource type, evaluates thresholds and hands events
//! to an [`EventSink`]. It has no thread of its own: a driver calls
//! [`ResourceMonitor::update`] and the configured interval gates the work.

mod record;
mod source;

pub use record::{ResourceStats, StatsSnapshot, UsageRecord};
pub use source::{ManualUsage, UsageSource};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{check_unit_interval, Result, SchedulerError};
use crate::events::{EventSink, EventType, MonitorEvent};
use crate::models::{ResourceType, Severity};

/// Monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum time between two update passes
    pub update_interval_ms: u64,
    /// Readings retained per resource for averages
    pub history_size: usize,
    /// Reading movement that produces a `UsageChanged` event
    pub usage_change_delta: f64,
    /// Regenerate the cached snapshot on every pass
    pub auto_snapshot: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            history_size: 100,
            usage_change_delta: 0.05,
            auto_snapshot: true,
        }
    }
}

impl MonitorConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_size == 0 {
            return Err(SchedulerError::invalid("history_size must be positive"));
        }
        check_unit_interval("usage_change_delta", self.usage_change_delta)
    }
}

/// Usage level that raises an alarm when reached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub resource_type: ResourceType,
    pub fraction: f64,
    pub severity: Severity,
}

/// Called with `(resource, usage, threshold_fraction, severity)`
pub type ThresholdCallback = Arc<dyn Fn(ResourceType, f64, f64, Severity) + Send + Sync>;

struct ThresholdEntry {
    threshold: Threshold,
    callback: Option<ThresholdCallback>,
}

struct MonitorState {
    config: MonitorConfig,
    running: bool,
    records: BTreeMap<ResourceType, UsageRecord>,
    thresholds: Vec<ThresholdEntry>,
    last_update: Option<Instant>,
    window_started: Instant,
    updates: u64,
    latest: Option<StatsSnapshot>,
}

impl MonitorState {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            taken_at: Utc::now(),
            running: self.running,
            updates: self.updates,
            resources: self.records.values().map(UsageRecord::stats).collect(),
        }
    }
}

/// Tracks usage of every resource type and raises threshold alarms
pub struct ResourceMonitor {
    source: Arc<dyn UsageSource>,
    sink: Arc<dyn EventSink>,
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    pub fn new(source: Arc<dyn UsageSource>, sink: Arc<dyn EventSink>) -> Self {
        let records = ResourceType::ALL
            .iter()
            .map(|r| (*r, UsageRecord::new(*r)))
            .collect();
        Self {
            source,
            sink,
            state: Mutex::new(MonitorState {
                config: MonitorConfig::default(),
                running: false,
                records,
                thresholds: Vec::new(),
                last_update: None,
                window_started: Instant::now(),
                updates: 0,
                latest: None,
            }),
        }
    }

    pub fn with_config(
        source: Arc<dyn UsageSource>,
        sink: Arc<dyn EventSink>,
        config: MonitorConfig,
    ) -> Result<Self> {
        let monitor = Self::new(source, sink);
        monitor.set_config(config)?;
        Ok(monitor)
    }

    pub fn set_config(&self, config: MonitorConfig) -> Result<()> {
        config.validate()?;
        crate::lock(&self.state).config = config;
        Ok(())
    }

    pub fn config(&self) -> MonitorConfig {
        crate::lock(&self.state).config.clone()
    }

    /// Begin monitoring; the next `update` always runs
    pub fn start(&self) {
        {
            let mut state = crate::lock(&self.state);
            if state.running {
                return;
            }
            state.running = true;
            state.last_update = None;
            state.window_started = Instant::now();
        }
        info!("Resource monitoring started");
        self.sink.emit(&MonitorEvent::new(
            EventType::MonitoringStarted,
            None,
            0.0,
            "resource monitoring started",
        ));
    }

    pub fn stop(&self) {
        {
            let mut state = crate::lock(&self.state);
            if !state.running {
                return;
            }
            state.running = false;
        }
        info!("Resource monitoring stopped");
        self.sink.emit(&MonitorEvent::new(
            EventType::MonitoringStopped,
            None,
            0.0,
            "resource monitoring stopped",
        ));
    }

    pub fn is_running(&self) -> bool {
        crate::lock(&self.state).running
    }

    /// Run one monitoring pass if running and the interval has elapsed
    ///
    /// Returns whether a pass ran. Events go to the sink and threshold
    /// callbacks run after the internal lock is released.
    pub fn update(&self) -> bool {
        {
            let mut state = crate::lock(&self.state);
            if !state.running {
                return false;
            }
            let interval = state.config.update_interval();
            if let Some(last) = state.last_update {
                if last.elapsed() < interval {
                    return false;
                }
            }
            state.last_update = Some(Instant::now());
        }

        // Sources may be slow; sample without holding the lock
        let readings: Vec<(ResourceType, f64)> = ResourceType::ALL
            .iter()
            .filter_map(|r| self.source.sample(*r).map(|v| (*r, v)))
            .collect();

        let mut events = Vec::new();
        let mut alarms = Vec::new();
        {
            let mut guard = crate::lock(&self.state);
            let state = &mut *guard;
            let history_size = state.config.history_size;
            let delta = state.config.usage_change_delta;

            for (resource, raw) in &readings {
                let Some(record) = state.records.get_mut(resource) else {
                    continue;
                };
                let value = resource.clamp_usage(*raw);
                let previous = record.apply(value, history_size);
                if (value - previous).abs() > delta {
                    events.push(MonitorEvent::new(
                        EventType::UsageChanged,
                        Some(*resource),
                        value,
                        format!("{} usage moved from {:.3} to {:.3}", resource, previous, value),
                    ));
                }
            }

            for entry in &state.thresholds {
                let t = entry.threshold;
                let Some(record) = state.records.get(&t.resource_type) else {
                    continue;
                };
                if !record.has_reading() || record.used_amount < t.fraction {
                    continue;
                }
                let usage = record.used_amount;
                events.push(
                    MonitorEvent::new(
                        EventType::ThresholdExceeded,
                        Some(t.resource_type),
                        usage,
                        format!(
                            "{} usage {:.3} reached threshold {:.3}",
                            t.resource_type, usage, t.fraction
                        ),
                    )
                    .with_severity(t.severity),
                );
                if let Some(callback) = &entry.callback {
                    alarms.push((callback.clone(), t, usage));
                }
            }

            let elapsed = state.window_started.elapsed().as_secs_f64();
            state.window_started = Instant::now();
            for record in state.records.values_mut() {
                if let Some(rate) = record.close_window(elapsed) {
                    events.push(MonitorEvent::new(
                        EventType::PerformanceMeasured,
                        Some(record.resource_type),
                        rate,
                        format!("{} operations at {:.2}/s", record.resource_type, rate),
                    ));
                }
            }

            state.updates += 1;
            if state.config.auto_snapshot {
                state.latest = Some(state.snapshot());
            }
        }

        debug!(
            readings = readings.len(),
            events = events.len(),
            alarms = alarms.len(),
            "Monitor update complete"
        );

        for event in &events {
            self.sink.emit(event);
        }
        for (callback, t, usage) in alarms {
            callback(t.resource_type, usage, t.fraction, t.severity);
        }
        true
    }

    /// Add a threshold; one with the same resource and fraction is replaced
    pub fn add_threshold(
        &self,
        resource: ResourceType,
        fraction: f64,
        severity: Severity,
    ) -> Result<()> {
        self.insert_threshold(resource, fraction, severity, None)
    }

    /// Add a threshold whose callback runs on every pass that reaches it
    pub fn add_threshold_with_callback<F>(
        &self,
        resource: ResourceType,
        fraction: f64,
        severity: Severity,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(ResourceType, f64, f64, Severity) + Send + Sync + 'static,
    {
        self.insert_threshold(resource, fraction, severity, Some(Arc::new(callback)))
    }

    pub fn remove_threshold(&self, resource: ResourceType, fraction: f64) -> Result<()> {
        let mut state = crate::lock(&self.state);
        let before = state.thresholds.len();
        state
            .thresholds
            .retain(|e| !(e.threshold.resource_type == resource && e.threshold.fraction == fraction));
        if state.thresholds.len() == before {
            return Err(SchedulerError::not_found(
                "threshold",
                format!("{}@{}", resource, fraction),
            ));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Vec<Threshold> {
        crate::lock(&self.state)
            .thresholds
            .iter()
            .map(|e| e.threshold)
            .collect()
    }

    /// Count operations against a resource; rates are computed on update
    pub fn record_operation(&self, resource: ResourceType, amount: u64) {
        let mut state = crate::lock(&self.state);
        if let Some(record) = state.records.get_mut(&resource) {
            record.add_operations(amount);
        }
    }

    /// Current reading of a resource
    pub fn usage(&self, resource: ResourceType) -> f64 {
        crate::lock(&self.state)
            .records
            .get(&resource)
            .map(|r| r.used_amount)
            .unwrap_or(0.0)
    }

    pub fn usage_record(&self, resource: ResourceType) -> Option<UsageRecord> {
        crate::lock(&self.state).records.get(&resource).cloned()
    }

    /// Build a fresh snapshot and cache it
    pub fn create_snapshot(&self) -> StatsSnapshot {
        let mut state = crate::lock(&self.state);
        let snapshot = state.snapshot();
        state.latest = Some(snapshot.clone());
        snapshot
    }

    /// Last cached snapshot; `None` before the first one
    pub fn latest_snapshot(&self) -> Option<StatsSnapshot> {
        crate::lock(&self.state).latest.clone()
    }

    /// Clear peaks, histories and operation counters
    pub fn reset_stats(&self) {
        let mut state = crate::lock(&self.state);
        for record in state.records.values_mut() {
            record.reset();
        }
        state.latest = None;
        info!("Monitor statistics reset");
    }

    fn insert_threshold(
        &self,
        resource: ResourceType,
        fraction: f64,
        severity: Severity,
        callback: Option<ThresholdCallback>,
    ) -> Result<()> {
        check_unit_interval("threshold fraction", fraction)?;
        let threshold = Threshold {
            resource_type: resource,
            fraction,
            severity,
        };
        let mut state = crate::lock(&self.state);
        state
            .thresholds
            .retain(|e| !(e.threshold.resource_type == resource && e.threshold.fraction == fraction));
        state.thresholds.push(ThresholdEntry {
            threshold,
            callback,
        });
        debug!(resource = %resource, fraction, severity = %severity, "Threshold registered");
        Ok(())
    }
}
