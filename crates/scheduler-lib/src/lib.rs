//! Adaptive compute-resource scheduler
//!
//! This crate provides the core functionality for:
//! - Host capability detection
//! - Capacity adjustment with pluggable allocation strategies
//! - Resource usage monitoring with threshold alarms
//! - Priority-based task balancing over a pool of resource units
//! - A tick driver, health checks and observability

pub mod adjuster;
pub mod balancer;
pub mod detector;
pub mod driver;
pub mod error;
pub mod events;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use adjuster::{AllocationConfig, AllocationMode, CapacityAdjuster, Strategy, UsageStats};
pub use balancer::{BalancerConfig, BalancerStats, ResourceUnit, Task, TaskBalancer, TaskListener};
pub use detector::{CapabilityDetector, CapabilityProvider, DetectFlags, HostProvider, StaticProvider};
pub use driver::{DriverConfig, SchedulerDriver, SchedulerDriverBuilder};
pub use error::{Result, SchedulerError};
pub use events::{EventSink, EventType, MonitorEvent};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use monitor::{MonitorConfig, ResourceMonitor, UsageSource};
pub use observability::{SchedulerMetrics, StructuredLogger};

// Component state stays consistent across a panicking callback, so a
// poisoned lock is still usable.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
