//! Health tracking for the scheduler components
//!
//! The registry holds one [`ComponentHealth`] per component and backs the
//! agent's liveness and readiness probes. The `assess_*` helpers turn
//! component statistics into a health entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::adjuster::{AllocationConfig, UsageStats};
use crate::balancer::BalancerStats;
use crate::detector::DetectorStats;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Compute overall status from component statuses
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const DETECTOR: &str = "detector";
    pub const ADJUSTER: &str = "adjuster";
    pub const MONITOR: &str = "monitor";
    pub const BALANCER: &str = "balancer";
    pub const DRIVER: &str = "driver";

    pub const ALL: [&str; 5] = [DETECTOR, ADJUSTER, MONITOR, BALANCER, DRIVER];
}

/// Detector health: degraded until the first detection
pub fn assess_detector(stats: &DetectorStats) -> ComponentHealth {
    if stats.detections == 0 {
        ComponentHealth::degraded("no capability detection has run")
    } else {
        ComponentHealth::healthy()
    }
}

/// Adjuster health from its statistics and configuration
pub fn assess_adjuster(stats: &UsageStats, config: &AllocationConfig) -> ComponentHealth {
    if stats.failed_adjustments > 0 && config.current_units == 0 {
        ComponentHealth::unhealthy(format!(
            "no units allocated after {} failed adjustment(s)",
            stats.failed_adjustments
        ))
    } else if stats.avg_error_rate > config.error_tolerance {
        ComponentHealth::degraded(format!(
            "average error rate {:.4} above tolerance {:.4}",
            stats.avg_error_rate, config.error_tolerance
        ))
    } else {
        ComponentHealth::healthy()
    }
}

/// Monitor health: degraded while stopped
pub fn assess_monitor(running: bool) -> ComponentHealth {
    if running {
        ComponentHealth::healthy()
    } else {
        ComponentHealth::degraded("monitoring stopped")
    }
}

/// Balancer health from pool and queue state
pub fn assess_balancer(stats: &BalancerStats, max_queue_size: usize) -> ComponentHealth {
    if stats.resource_units > 0 && stats.active_units == 0 {
        ComponentHealth::unhealthy("every resource unit is inactive")
    } else if stats.resource_units == 0 {
        ComponentHealth::degraded("no resource units registered")
    } else if stats.pending_tasks >= max_queue_size {
        ComponentHealth::degraded(format!("pending queue full ({} tasks)", stats.pending_tasks))
    } else {
        ComponentHealth::healthy()
    }
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Update component health status
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Scheduler not yet initialized".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Scheduler component unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_health_registry_degraded_status() {
        let registry = HealthRegistry::new();
        for name in components::ALL {
            registry.register(name).await;
        }

        registry
            .set_degraded(components::BALANCER, "no resource units registered")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.components.len(), components::ALL.len());
    }

    #[tokio::test]
    async fn test_readiness_gates() {
        let registry = HealthRegistry::new();
        registry.register(components::ADJUSTER).await;
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::ADJUSTER, "capacity unavailable")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[test]
    fn test_assess_adjuster() {
        let config = AllocationConfig {
            error_tolerance: 0.05,
            ..Default::default()
        };
        let mut stats = UsageStats::default();
        assert_eq!(
            assess_adjuster(&stats, &config).status,
            ComponentStatus::Healthy
        );

        stats.avg_error_rate = 0.2;
        assert_eq!(
            assess_adjuster(&stats, &config).status,
            ComponentStatus::Degraded
        );

        stats.failed_adjustments = 2;
        assert_eq!(
            assess_adjuster(&stats, &config).status,
            ComponentStatus::Unhealthy
        );
    }

    #[test]
    fn test_assess_balancer() {
        let mut stats = BalancerStats::default();
        assert_eq!(
            assess_balancer(&stats, 10).status,
            ComponentStatus::Degraded
        );

        stats.resource_units = 2;
        stats.active_units = 2;
        assert_eq!(assess_balancer(&stats, 10).status, ComponentStatus::Healthy);

        stats.pending_tasks = 10;
        assert_eq!(
            assess_balancer(&stats, 10).status,
            ComponentStatus::Degraded
        );

        stats.active_units = 0;
        assert_eq!(
            assess_balancer(&stats, 10).status,
            ComponentStatus::Unhealthy
        );
    }

    #[test]
    fn test_assess_detector_and_monitor() {
        let stats = DetectorStats::default();
        assert_eq!(assess_detector(&stats).status, ComponentStatus::Degraded);
        let stats = DetectorStats {
            detections: 1,
            ..Default::default()
        };
        assert_eq!(assess_detector(&stats).status, ComponentStatus::Healthy);

        assert!(assess_monitor(false).status.is_operational());
        assert_eq!(assess_monitor(true).status, ComponentStatus::Healthy);
    }
}
