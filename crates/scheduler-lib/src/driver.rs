//! Scheduler tick loop
//!
//! The components never run on their own. The driver calls detection,
//! monitoring, adjuster polling and rebalancing on a jittered interval,
//! switches to a slower interval while ticks are slow, and publishes health
//! and metrics after every tick.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::adjuster::{AdjustOutcome, CapacityAdjuster};
use crate::balancer::TaskBalancer;
use crate::detector::CapabilityDetector;
use crate::health::{self, components, ComponentHealth, HealthRegistry};
use crate::monitor::ResourceMonitor;
use crate::observability::{SchedulerMetrics, StructuredLogger};

/// Configuration for the tick loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Base tick interval (default: 1 second)
    pub tick_interval_ms: u64,
    /// Maximum jitter added to the interval (default: 100 ms)
    pub jitter_ms: u64,
    /// Interval used while in degraded mode (default: 10 seconds)
    pub degraded_interval_ms: u64,
    /// Ticks slower than this enter degraded mode (default: 250 ms)
    pub slow_tick_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            jitter_ms: 100,
            degraded_interval_ms: 10_000,
            slow_tick_ms: 250,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub detected: bool,
    pub monitor_updated: bool,
    pub adjustment: Option<AdjustOutcome>,
    /// Tasks started by a rebalance, when one ran
    pub rebalanced: Option<usize>,
    pub elapsed: Duration,
}

/// Drives the scheduler components
pub struct SchedulerDriver {
    detector: Arc<CapabilityDetector>,
    adjuster: Arc<CapacityAdjuster>,
    monitor: Arc<ResourceMonitor>,
    balancer: Arc<TaskBalancer>,
    config: DriverConfig,
    health: Option<HealthRegistry>,
    metrics: Option<SchedulerMetrics>,
    logger: Option<StructuredLogger>,
    degraded_mode: bool,
}

impl SchedulerDriver {
    /// Run one pass over every component
    pub fn tick(&self) -> TickReport {
        let start = Instant::now();

        let detected = self.detector.tick().is_some();
        let monitor_updated = self.monitor.update();

        let adjustment = match self.adjuster.poll() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Scheduled capacity adjustment failed");
                None
            }
        };

        let rebalance_start = Instant::now();
        let rebalanced = self.balancer.tick();
        if rebalanced.is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.observe_rebalance_latency(rebalance_start.elapsed().as_secs_f64());
            }
        }

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_tick_latency(elapsed.as_secs_f64());
        }

        TickReport {
            detected,
            monitor_updated,
            adjustment,
            rebalanced,
            elapsed,
        }
    }

    /// Tick until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.tick_interval_ms,
            "Starting scheduler driver"
        );

        let mut tick_count = 0u64;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.current_interval()) => {
                    let report = self.tick();
                    tick_count += 1;

                    // Periodic summary; individual passes log at their own level
                    if tick_count % 60 == 0 {
                        debug!(
                            ticks = tick_count,
                            elapsed_ms = report.elapsed.as_millis() as u64,
                            degraded = self.degraded_mode,
                            current_units = self.adjuster.current_units(),
                            "Scheduler driver heartbeat"
                        );
                    }

                    self.check_tick_pressure(report.elapsed);
                    self.publish().await;
                }
                _ = shutdown.recv() => {
                    info!(ticks = tick_count, "Shutting down scheduler driver");
                    break;
                }
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_mode
    }

    /// Get the current tick interval (accounting for degraded mode)
    fn current_interval(&self) -> Duration {
        let base = if self.degraded_mode {
            self.config.degraded_interval_ms
        } else {
            self.config.tick_interval_ms
        };

        // Jitter keeps co-located schedulers from ticking in lockstep
        Duration::from_millis(base + rand_jitter(self.config.jitter_ms))
    }

    /// Enter or leave degraded mode based on tick duration
    fn check_tick_pressure(&mut self, tick_duration: Duration) {
        let threshold = Duration::from_millis(self.config.slow_tick_ms);

        let changed = if tick_duration > threshold && !self.degraded_mode {
            self.degraded_mode = true;
            true
        } else if tick_duration < threshold / 2 && self.degraded_mode {
            self.degraded_mode = false;
            true
        } else {
            false
        };

        if changed {
            match &self.logger {
                Some(logger) => {
                    logger.log_degraded_mode(self.degraded_mode, tick_duration.as_millis())
                }
                None if self.degraded_mode => warn!(
                    elapsed_ms = tick_duration.as_millis() as u64,
                    "Entering degraded mode due to slow ticks"
                ),
                None => info!("Exiting degraded mode, tick duration recovered"),
            }
        }
    }

    /// Push component health and counters to the registry and metrics
    async fn publish(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_usage_stats(&self.adjuster.stats());
            metrics.record_balancer_stats(&self.balancer.stats());
            metrics.set_degraded(self.degraded_mode);
        }

        let Some(registry) = &self.health else {
            return;
        };
        registry
            .update(
                components::DETECTOR,
                health::assess_detector(&self.detector.stats()),
            )
            .await;
        registry
            .update(
                components::ADJUSTER,
                health::assess_adjuster(&self.adjuster.stats(), &self.adjuster.config()),
            )
            .await;
        registry
            .update(
                components::MONITOR,
                health::assess_monitor(self.monitor.is_running()),
            )
            .await;
        registry
            .update(
                components::BALANCER,
                health::assess_balancer(
                    &self.balancer.stats(),
                    self.balancer.config().max_queue_size,
                ),
            )
            .await;
        let driver_health = if self.degraded_mode {
            ComponentHealth::degraded("running at degraded interval")
        } else {
            ComponentHealth::healthy()
        };
        registry.update(components::DRIVER, driver_health).await;
    }
}

/// Generate a jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    // Clock-derived spread is enough to de-synchronise instances
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builder for the scheduler driver
pub struct SchedulerDriverBuilder {
    detector: Option<Arc<CapabilityDetector>>,
    adjuster: Option<Arc<CapacityAdjuster>>,
    monitor: Option<Arc<ResourceMonitor>>,
    balancer: Option<Arc<TaskBalancer>>,
    config: DriverConfig,
    health: Option<HealthRegistry>,
    metrics: Option<SchedulerMetrics>,
    logger: Option<StructuredLogger>,
}

impl SchedulerDriverBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            detector: None,
            adjuster: None,
            monitor: None,
            balancer: None,
            config: DriverConfig::default(),
            health: None,
            metrics: None,
            logger: None,
        }
    }

    pub fn detector(mut self, detector: Arc<CapabilityDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn adjuster(mut self, adjuster: Arc<CapacityAdjuster>) -> Self {
        self.adjuster = Some(adjuster);
        self
    }

    pub fn monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn balancer(mut self, balancer: Arc<TaskBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the tick interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the jitter duration
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Publish component health to this registry after every tick
    pub fn health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    pub fn metrics(mut self, metrics: SchedulerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the driver
    pub fn build(self) -> Result<SchedulerDriver> {
        let detector = self
            .detector
            .ok_or_else(|| anyhow::anyhow!("Capability detector is required"))?;
        let adjuster = self
            .adjuster
            .ok_or_else(|| anyhow::anyhow!("Capacity adjuster is required"))?;
        let monitor = self
            .monitor
            .ok_or_else(|| anyhow::anyhow!("Resource monitor is required"))?;
        let balancer = self
            .balancer
            .ok_or_else(|| anyhow::anyhow!("Task balancer is required"))?;
        if self.config.tick_interval_ms == 0 {
            anyhow::bail!("Tick interval must be positive");
        }

        Ok(SchedulerDriver {
            detector,
            adjuster,
            monitor,
            balancer,
            config: self.config,
            health: self.health,
            metrics: self.metrics,
            logger: self.logger,
            degraded_mode: false,
        })
    }
}

impl Default for SchedulerDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
