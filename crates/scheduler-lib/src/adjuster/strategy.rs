//! Unit-count recommendation strategies
//!
//! [`recommend`] is a pure function of the capability snapshot, the
//! allocation config and the usage statistics. The result is always clamped
//! into `[min_units, min(max_units, max_supported)]`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::{AllocationConfig, UsageStats};
use crate::error::{Result, SchedulerError};
use crate::models::Capabilities;

/// Share of the host maximum used by the conservative strategy
pub const CONSERVATIVE_FRACTION: f64 = 0.70;

/// Share of the host maximum used by the balanced strategy
pub const BALANCED_FRACTION: f64 = 0.85;

/// Share of the host maximum used by the aggressive strategy
pub const AGGRESSIVE_FRACTION: f64 = 0.95;

/// Absorbs representation error before rounding, e.g. 28 * 0.7
const ROUNDING_EPSILON: f64 = 1e-9;

/// Caller-supplied recommendation function
pub type CustomStrategy =
    Arc<dyn Fn(&Capabilities, &AllocationConfig, &UsageStats) -> u32 + Send + Sync>;

/// Policy mapping current state to a unit count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Conservative,
    Balanced,
    Aggressive,
    Adaptive,
    Custom,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Conservative => write!(f, "conservative"),
            Strategy::Balanced => write!(f, "balanced"),
            Strategy::Aggressive => write!(f, "aggressive"),
            Strategy::Adaptive => write!(f, "adaptive"),
            Strategy::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Strategy::Conservative),
            "balanced" => Ok(Strategy::Balanced),
            "aggressive" => Ok(Strategy::Aggressive),
            "adaptive" => Ok(Strategy::Adaptive),
            "custom" => Ok(Strategy::Custom),
            other => Err(SchedulerError::invalid(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

/// Tunables of the adaptive strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTuning {
    /// Grow when active/current exceeds this
    pub grow_usage_ratio: f64,
    /// ...and average error / tolerance stays below this
    pub grow_error_ratio: f64,
    /// Shrink when active/current falls below this
    pub shrink_usage_ratio: f64,
    /// Shrink when average error / tolerance exceeds this
    pub error_shrink_ratio: f64,
    pub grow_step: f64,
    pub shrink_step: f64,
    pub error_shrink_step: f64,
}

impl Default for AdaptiveTuning {
    fn default() -> Self {
        Self {
            grow_usage_ratio: 0.85,
            grow_error_ratio: 0.8,
            shrink_usage_ratio: 0.5,
            error_shrink_ratio: 1.2,
            grow_step: 0.15,
            shrink_step: 0.15,
            error_shrink_step: 0.10,
        }
    }
}

impl AdaptiveTuning {
    pub fn validate(&self) -> Result<()> {
        for (name, step) in [
            ("grow_step", self.grow_step),
            ("shrink_step", self.shrink_step),
            ("error_shrink_step", self.error_shrink_step),
        ] {
            if !(step.is_finite() && step > 0.0 && step < 1.0) {
                return Err(SchedulerError::invalid(format!(
                    "{} must be within (0, 1), got {}",
                    name, step
                )));
            }
        }
        for (name, ratio) in [
            ("grow_usage_ratio", self.grow_usage_ratio),
            ("grow_error_ratio", self.grow_error_ratio),
            ("shrink_usage_ratio", self.shrink_usage_ratio),
            ("error_shrink_ratio", self.error_shrink_ratio),
        ] {
            if !(ratio.is_finite() && ratio >= 0.0) {
                return Err(SchedulerError::invalid(format!(
                    "{} must be non-negative, got {}",
                    name, ratio
                )));
            }
        }
        Ok(())
    }
}

/// Recommend a unit count
///
/// `custom` is consulted only for [`Strategy::Custom`]; without it the
/// balanced policy applies.
pub fn recommend(
    caps: &Capabilities,
    config: &AllocationConfig,
    stats: &UsageStats,
    custom: Option<&CustomStrategy>,
) -> u32 {
    let max_supported = caps.max_supported_units();
    let raw = match config.strategy {
        Strategy::Conservative => conservative(max_supported, config),
        Strategy::Balanced => balanced(max_supported, config),
        Strategy::Aggressive => fraction_of(max_supported, AGGRESSIVE_FRACTION).max(config.min_units),
        Strategy::Adaptive => adaptive(max_supported, config, stats),
        Strategy::Custom => match custom {
            Some(f) => f(caps, config, stats),
            None => balanced(max_supported, config),
        },
    };
    clamp_units(raw, config, max_supported)
}

/// Clamp into `[min_units, min(max_units, max_supported)]`
pub fn clamp_units(value: u32, config: &AllocationConfig, max_supported: u32) -> u32 {
    let upper = if config.max_units > 0 {
        config.max_units.min(max_supported)
    } else {
        max_supported
    };
    value.min(upper).max(config.min_units)
}

fn conservative(max_supported: u32, config: &AllocationConfig) -> u32 {
    if max_supported < config.min_units {
        return max_supported;
    }
    fraction_of(max_supported, CONSERVATIVE_FRACTION).max(config.min_units)
}

fn balanced(max_supported: u32, config: &AllocationConfig) -> u32 {
    if config.optimal_units > 0 && config.optimal_units <= max_supported {
        return config.optimal_units;
    }
    fraction_of(max_supported, BALANCED_FRACTION).max(config.min_units)
}

fn adaptive(max_supported: u32, config: &AllocationConfig, stats: &UsageStats) -> u32 {
    let current = config.current_units;
    if current == 0 {
        return balanced(max_supported, config);
    }
    // Nothing measured since the last change: hold
    if stats.samples_since_adjustment == 0 {
        return current;
    }

    let tuning = &config.adaptive;
    let usage_ratio = stats.active_units as f64 / current as f64;
    let error_ratio = stats.avg_error_rate / config.error_tolerance;

    if usage_ratio > tuning.grow_usage_ratio && error_ratio < tuning.grow_error_ratio {
        scale_up(current, tuning.grow_step).min(max_supported)
    } else if usage_ratio < tuning.shrink_usage_ratio {
        scale_down(current, tuning.shrink_step).max(config.min_units)
    } else if error_ratio > tuning.error_shrink_ratio {
        scale_down(current, tuning.error_shrink_step).max(config.min_units)
    } else {
        current
    }
}

fn fraction_of(value: u32, fraction: f64) -> u32 {
    (value as f64 * fraction + ROUNDING_EPSILON).floor() as u32
}

fn scale_up(value: u32, step: f64) -> u32 {
    let scaled = (value as f64 * (1.0 + step) - ROUNDING_EPSILON).ceil();
    (scaled as u32).max(value.saturating_add(1))
}

fn scale_down(value: u32, step: f64) -> u32 {
    fraction_of(value, 1.0 - step)
}
