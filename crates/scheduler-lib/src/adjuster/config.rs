//! Allocation configuration and usage statistics

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::strategy::{AdaptiveTuning, Strategy};
use crate::error::{Result, SchedulerError};

/// Weight of a new error-rate sample in the moving average
pub const ERROR_RATE_SMOOTHING: f64 = 0.3;

/// Usage fraction of the current allocation that triggers an on-demand
/// adjustment
pub const ON_DEMAND_USAGE_TRIGGER: f64 = 0.9;

/// When automatic adjustment is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Only explicit `adjust_now` calls
    Manual,
    /// When usage nears the allocation or errors exceed tolerance
    OnDemand,
    /// Once per configured interval
    Periodic,
    /// On every usage report
    Continuous,
}

impl std::str::FromStr for AllocationMode {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "manual" => Ok(AllocationMode::Manual),
            "on_demand" | "ondemand" => Ok(AllocationMode::OnDemand),
            "periodic" => Ok(AllocationMode::Periodic),
            "continuous" => Ok(AllocationMode::Continuous),
            other => Err(SchedulerError::invalid(format!(
                "unknown allocation mode '{}'",
                other
            ))),
        }
    }
}

/// Unit allocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub min_units: u32,
    /// Upper bound on units; 0 means bounded only by the host
    pub max_units: u32,
    /// Preferred unit count for the balanced strategy; 0 means unset
    pub optimal_units: u32,
    /// Units currently allocated; 0 means nothing allocated yet
    pub current_units: u32,
    pub error_tolerance: f64,
    pub strategy: Strategy,
    pub mode: AllocationMode,
    pub interval_ms: u64,
    pub adaptive: AdaptiveTuning,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            min_units: 1,
            max_units: 0,
            optimal_units: 0,
            current_units: 0,
            error_tolerance: 0.05,
            strategy: Strategy::Balanced,
            mode: AllocationMode::Manual,
            interval_ms: 60_000,
            adaptive: AdaptiveTuning::default(),
        }
    }
}

impl AllocationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.error_tolerance.is_finite() || self.error_tolerance <= 0.0 {
            return Err(SchedulerError::invalid(format!(
                "error_tolerance must be positive, got {}",
                self.error_tolerance
            )));
        }
        if self.max_units > 0 && self.min_units > self.max_units {
            return Err(SchedulerError::invalid(format!(
                "min_units ({}) exceeds max_units ({})",
                self.min_units, self.max_units
            )));
        }
        if self.current_units > 0 {
            let above_max = self.max_units > 0 && self.current_units > self.max_units;
            if self.current_units < self.min_units || above_max {
                return Err(SchedulerError::invalid(format!(
                    "current_units ({}) outside [{}, {}]",
                    self.current_units,
                    self.min_units,
                    if self.max_units > 0 {
                        self.max_units.to_string()
                    } else {
                        "unbounded".to_string()
                    }
                )));
            }
        }
        if self.mode == AllocationMode::Periodic && self.interval_ms == 0 {
            return Err(SchedulerError::invalid(
                "periodic mode requires a positive interval_ms",
            ));
        }
        self.adaptive.validate()
    }
}

/// Allocation counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub allocated_units: u32,
    /// Overwritten by every usage report
    pub active_units: u32,
    pub peak_units: u32,
    pub total_adjustments: u64,
    pub failed_adjustments: u64,
    /// Exponential moving average, overwritten by every usage report
    pub avg_error_rate: f64,
    /// Usage reports received since the last applied adjustment
    pub samples_since_adjustment: u64,
    pub last_adjustment_at: Option<DateTime<Utc>>,
}

impl UsageStats {
    /// Fold one error-rate sample into the moving average
    pub(crate) fn record_error_rate(&mut self, error_rate: f64) {
        self.avg_error_rate =
            ERROR_RATE_SMOOTHING * error_rate + (1.0 - ERROR_RATE_SMOOTHING) * self.avg_error_rate;
    }
}
