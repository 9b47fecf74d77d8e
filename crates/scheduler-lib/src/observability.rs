//! Observability for the scheduler
//!
//! Provides:
//! - Prometheus metrics (tick and rebalance latency, unit allocation, queue
//!   depth, resource usage, task and adjustment totals)
//! - Structured JSON logging of significant scheduler events

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, GaugeVec, Histogram, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::adjuster::{AdjustStatus, UsageStats};
use crate::balancer::{BalancerStats, Task};
use crate::events::{EventSink, EventType, MonitorEvent};
use crate::models::{Capabilities, ResourceType, Severity, TaskStatus};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    tick_latency_seconds: Histogram,
    rebalance_latency_seconds: Histogram,
    allocated_units: IntGauge,
    active_units: IntGauge,
    peak_units: IntGauge,
    pending_tasks: IntGauge,
    running_tasks: IntGauge,
    resource_usage: GaugeVec,
    threshold_breaches: IntCounterVec,
    tasks_total: IntGaugeVec,
    adjustments_total: IntGaugeVec,
    degraded_mode: IntGauge,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "scheduler_tick_latency_seconds",
                "Time spent in one driver tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            rebalance_latency_seconds: register_histogram!(
                "scheduler_rebalance_latency_seconds",
                "Time spent in one rebalance pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register rebalance_latency_seconds"),

            allocated_units: register_int_gauge!(
                "scheduler_allocated_units",
                "Units currently allocated by the capacity adjuster"
            )
            .expect("Failed to register allocated_units"),

            active_units: register_int_gauge!(
                "scheduler_active_units",
                "Units in use according to the latest usage report"
            )
            .expect("Failed to register active_units"),

            peak_units: register_int_gauge!(
                "scheduler_peak_units",
                "Highest unit allocation so far"
            )
            .expect("Failed to register peak_units"),

            pending_tasks: register_int_gauge!(
                "scheduler_pending_tasks",
                "Tasks waiting for a resource unit"
            )
            .expect("Failed to register pending_tasks"),

            running_tasks: register_int_gauge!(
                "scheduler_running_tasks",
                "Tasks holding capacity on a resource unit"
            )
            .expect("Failed to register running_tasks"),

            resource_usage: register_gauge_vec!(
                "scheduler_resource_usage_ratio",
                "Latest usage reading per resource type",
                &["resource"]
            )
            .expect("Failed to register resource_usage_ratio"),

            threshold_breaches: register_int_counter_vec!(
                "scheduler_threshold_breaches_total",
                "Threshold evaluations that reached their level",
                &["resource", "severity"]
            )
            .expect("Failed to register threshold_breaches_total"),

            tasks_total: register_int_gauge_vec!(
                "scheduler_tasks_total",
                "Tasks by outcome since start",
                &["outcome"]
            )
            .expect("Failed to register tasks_total"),

            adjustments_total: register_int_gauge_vec!(
                "scheduler_adjustments_total",
                "Capacity adjustments by result since start",
                &["result"]
            )
            .expect("Failed to register adjustments_total"),

            degraded_mode: register_int_gauge!(
                "scheduler_driver_degraded",
                "1 while the driver runs at its degraded interval"
            )
            .expect("Failed to register driver_degraded"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn observe_rebalance_latency(&self, duration_secs: f64) {
        self.inner().rebalance_latency_seconds.observe(duration_secs);
    }

    /// Mirror the adjuster's counters
    pub fn record_usage_stats(&self, stats: &UsageStats) {
        let inner = self.inner();
        inner.allocated_units.set(stats.allocated_units as i64);
        inner.active_units.set(stats.active_units as i64);
        inner.peak_units.set(stats.peak_units as i64);
        inner
            .adjustments_total
            .with_label_values(&["applied"])
            .set(stats.total_adjustments as i64);
        inner
            .adjustments_total
            .with_label_values(&["failed"])
            .set(stats.failed_adjustments as i64);
    }

    /// Mirror the balancer's counters
    pub fn record_balancer_stats(&self, stats: &BalancerStats) {
        let inner = self.inner();
        inner.pending_tasks.set(stats.pending_tasks as i64);
        inner.running_tasks.set(stats.running_tasks as i64);
        for (outcome, value) in [
            ("succeeded", stats.tasks_succeeded),
            ("failed", stats.tasks_failed),
            ("cancelled", stats.tasks_cancelled),
            ("rejected", stats.tasks_rejected),
        ] {
            inner
                .tasks_total
                .with_label_values(&[outcome])
                .set(value as i64);
        }
    }

    pub fn set_resource_usage(&self, resource: ResourceType, value: f64) {
        let resource = resource.to_string();
        self.inner()
            .resource_usage
            .with_label_values(&[resource.as_str()])
            .set(value);
    }

    pub fn inc_threshold_breach(&self, resource: ResourceType, severity: Severity) {
        let (resource, severity) = (resource.to_string(), severity.to_string());
        self.inner()
            .threshold_breaches
            .with_label_values(&[resource.as_str(), severity.as_str()])
            .inc();
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.inner().degraded_mode.set(i64::from(degraded));
    }
}

/// Feeds monitor events into the metrics
impl EventSink for SchedulerMetrics {
    fn emit(&self, event: &MonitorEvent) {
        let Some(resource) = event.resource_type else {
            return;
        };
        match event.event_type {
            EventType::UsageChanged => self.set_resource_usage(resource, event.value),
            EventType::ThresholdExceeded => {
                self.inc_threshold_breach(resource, event.severity.unwrap_or(Severity::Warning))
            }
            _ => {}
        }
    }
}

/// Structured logger for scheduler events
///
/// One record per significant event, each tagged with an `event` field.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log a significant capability change
    pub fn log_capability_change(&self, current: &Capabilities, previous: &Capabilities) {
        info!(
            event = "capabilities_changed",
            instance = %self.instance,
            cores = current.processing.cores,
            previous_cores = previous.processing.cores,
            available_memory_bytes = current.memory.available_bytes,
            previous_available_memory_bytes = previous.memory.available_bytes,
            max_units = current.unit_hardware.max_units,
            previous_max_units = previous.unit_hardware.max_units,
            dedicated_hardware = current.unit_hardware.has_dedicated_hardware,
            "Host capabilities changed"
        );
    }

    /// Log an applied or failed unit adjustment
    pub fn log_adjustment(&self, old_units: u32, new_units: u32, status: AdjustStatus) {
        match status {
            AdjustStatus::Success => {
                info!(
                    event = "units_adjusted",
                    instance = %self.instance,
                    old_units = old_units,
                    new_units = new_units,
                    "Unit allocation adjusted"
                );
            }
            AdjustStatus::InsufficientUnits => {
                warn!(
                    event = "units_adjust_failed",
                    instance = %self.instance,
                    current_units = old_units,
                    status = %status,
                    "Host cannot provide the minimum unit count"
                );
            }
        }
    }

    /// Log a threshold breach reported by a threshold callback
    pub fn log_threshold(
        &self,
        resource: ResourceType,
        usage: f64,
        threshold: f64,
        severity: Severity,
    ) {
        match severity {
            Severity::Critical => {
                warn!(
                    event = "threshold_exceeded",
                    instance = %self.instance,
                    resource = %resource,
                    usage = usage,
                    threshold = threshold,
                    severity = %severity,
                    "Critical resource threshold exceeded"
                );
            }
            _ => {
                info!(
                    event = "threshold_exceeded",
                    instance = %self.instance,
                    resource = %resource,
                    usage = usage,
                    threshold = threshold,
                    severity = %severity,
                    "Resource threshold exceeded"
                );
            }
        }
    }

    /// Log a task reaching a terminal state
    pub fn log_task_finished(&self, task: &Task) {
        if task.status == TaskStatus::Failed {
            warn!(
                event = "task_finished",
                instance = %self.instance,
                task_id = task.id,
                task_type = ?task.task_type,
                status = %task.status,
                unit_id = ?task.assigned_unit_id,
                duration_ms = ?task.actual_duration_ms,
                "Task failed"
            );
        } else {
            info!(
                event = "task_finished",
                instance = %self.instance,
                task_id = task.id,
                task_type = ?task.task_type,
                status = %task.status,
                unit_id = ?task.assigned_unit_id,
                duration_ms = ?task.actual_duration_ms,
                "Task finished"
            );
        }
    }

    /// Log the driver switching between normal and degraded interval
    pub fn log_degraded_mode(&self, degraded: bool, tick_ms: u128) {
        if degraded {
            warn!(
                event = "driver_degraded",
                instance = %self.instance,
                tick_ms = tick_ms as u64,
                "Scheduler driver entering degraded mode"
            );
        } else {
            info!(
                event = "driver_recovered",
                instance = %self.instance,
                tick_ms = tick_ms as u64,
                "Scheduler driver back to normal interval"
            );
        }
    }

    /// Log scheduler startup
    pub fn log_startup(&self, version: &str, max_units: u32) {
        info!(
            event = "scheduler_started",
            instance = %self.instance,
            version = %version,
            max_units = max_units,
            "Adaptive scheduler started"
        );
    }

    /// Log scheduler shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Adaptive scheduler shutting down"
        );
    }
}
