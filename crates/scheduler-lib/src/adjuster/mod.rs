//! Capacity adjustment
//!
//! The [`CapacityAdjuster`] owns the allocation config and usage statistics,
//! asks a [`Strategy`] for a unit count and applies it. Adjustments are
//! either explicit (`adjust_now`) or triggered by usage reports and driver
//! polls according to the [`AllocationMode`] while auto-adjust is on.

mod config;
mod strategy;

pub use config::{
    AllocationConfig, AllocationMode, UsageStats, ERROR_RATE_SMOOTHING, ON_DEMAND_USAGE_TRIGGER,
};
pub use strategy::{
    clamp_units, recommend, AdaptiveTuning, CustomStrategy, Strategy, AGGRESSIVE_FRACTION,
    BALANCED_FRACTION, CONSERVATIVE_FRACTION,
};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detector::CapabilityDetector;
use crate::error::{Result, SchedulerError};

/// Result reported to the adjustment listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustStatus {
    Success,
    /// The host cannot provide `min_units`
    InsufficientUnits,
}

impl std::fmt::Display for AdjustStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjustStatus::Success => write!(f, "success"),
            AdjustStatus::InsufficientUnits => write!(f, "insufficient_units"),
        }
    }
}

/// Outcome of a successful `adjust_now`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdjustOutcome {
    Applied { previous: u32, current: u32 },
    NoChangeNeeded { current: u32 },
}

impl AdjustOutcome {
    pub fn current(&self) -> u32 {
        match self {
            AdjustOutcome::Applied { current, .. } => *current,
            AdjustOutcome::NoChangeNeeded { current } => *current,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, AdjustOutcome::Applied { .. })
    }
}

/// Called with `(old_units, new_units, status)` after every applied or
/// failed adjustment
pub type AdjustmentListener = Arc<dyn Fn(u32, u32, AdjustStatus) + Send + Sync>;

#[derive(Debug)]
struct AdjusterState {
    config: AllocationConfig,
    stats: UsageStats,
    auto: bool,
    last_adjustment: Option<Instant>,
}

/// Chooses and applies the allocated unit count
pub struct CapacityAdjuster {
    detector: Arc<CapabilityDetector>,
    state: Mutex<AdjusterState>,
    current_units: AtomicU32,
    custom: RwLock<Option<CustomStrategy>>,
    listener: RwLock<Option<AdjustmentListener>>,
}

impl CapacityAdjuster {
    pub fn new(detector: Arc<CapabilityDetector>, config: AllocationConfig) -> Result<Self> {
        config.validate()?;
        let current = config.current_units;
        Ok(Self {
            detector,
            state: Mutex::new(AdjusterState {
                config,
                stats: UsageStats {
                    allocated_units: current,
                    peak_units: current,
                    ..Default::default()
                },
                auto: false,
                last_adjustment: None,
            }),
            current_units: AtomicU32::new(current),
            custom: RwLock::new(None),
            listener: RwLock::new(None),
        })
    }

    /// Replace the allocation config after validating it
    pub fn set_config(&self, config: AllocationConfig) -> Result<()> {
        config.validate()?;
        let mut state = crate::lock(&self.state);
        info!(
            strategy = %config.strategy,
            mode = ?config.mode,
            min_units = config.min_units,
            max_units = config.max_units,
            current_units = config.current_units,
            "Allocation config updated"
        );
        self.current_units
            .store(config.current_units, Ordering::SeqCst);
        state.stats.allocated_units = config.current_units;
        state.stats.peak_units = state.stats.peak_units.max(config.current_units);
        state.config = config;
        Ok(())
    }

    pub fn config(&self) -> AllocationConfig {
        crate::lock(&self.state).config.clone()
    }

    pub fn stats(&self) -> UsageStats {
        crate::lock(&self.state).stats.clone()
    }

    /// Currently allocated units; 0 while nothing has been allocated
    pub fn current_units(&self) -> u32 {
        self.current_units.load(Ordering::SeqCst)
    }

    /// Register the function used by [`Strategy::Custom`]
    pub fn set_custom_strategy<F>(&self, strategy: F)
    where
        F: Fn(&crate::models::Capabilities, &AllocationConfig, &UsageStats) -> u32
            + Send
            + Sync
            + 'static,
    {
        *crate::write(&self.custom) = Some(Arc::new(strategy));
    }

    /// Register the adjustment listener, replacing any previous one
    pub fn on_adjustment<F>(&self, listener: F)
    where
        F: Fn(u32, u32, AdjustStatus) + Send + Sync + 'static,
    {
        *crate::write(&self.listener) = Some(Arc::new(listener));
    }

    /// What the configured strategy would choose right now
    pub fn recommended_units(&self) -> u32 {
        let caps = self.detector.last_capabilities();
        let custom = crate::read(&self.custom).clone();
        let state = crate::lock(&self.state);
        recommend(&caps, &state.config, &state.stats, custom.as_ref())
    }

    /// Compute and apply a recommendation
    ///
    /// Fails with `CapacityUnavailable` when the host supports fewer units
    /// than `min_units`. The custom strategy runs under the adjuster lock
    /// and must not call back into the adjuster.
    pub fn adjust_now(&self) -> Result<AdjustOutcome> {
        let caps = self.detector.last_capabilities();
        let custom = crate::read(&self.custom).clone();

        let (result, notify) = {
            let mut state = crate::lock(&self.state);
            let max_supported = caps.max_supported_units();
            let previous = state.config.current_units;

            if max_supported < state.config.min_units {
                state.stats.failed_adjustments += 1;
                warn!(
                    max_supported,
                    min_units = state.config.min_units,
                    "Host cannot provide the minimum unit count"
                );
                (
                    Err(SchedulerError::CapacityUnavailable {
                        supported: max_supported,
                        required: state.config.min_units,
                    }),
                    Some((previous, previous, AdjustStatus::InsufficientUnits)),
                )
            } else {
                let units = recommend(&caps, &state.config, &state.stats, custom.as_ref());
                if units == previous && previous > 0 {
                    debug!(units, "Allocation already optimal");
                    (Ok(AdjustOutcome::NoChangeNeeded { current: units }), None)
                } else {
                    state.config.current_units = units;
                    let stats = &mut state.stats;
                    stats.allocated_units = units;
                    stats.peak_units = stats.peak_units.max(units);
                    stats.total_adjustments += 1;
                    stats.samples_since_adjustment = 0;
                    stats.last_adjustment_at = Some(Utc::now());
                    state.last_adjustment = Some(Instant::now());
                    self.current_units.store(units, Ordering::SeqCst);

                    info!(
                        previous,
                        current = units,
                        strategy = %state.config.strategy,
                        "Unit allocation adjusted"
                    );
                    (
                        Ok(AdjustOutcome::Applied {
                            previous,
                            current: units,
                        }),
                        Some((previous, units, AdjustStatus::Success)),
                    )
                }
            }
        };

        if let Some((old, new, status)) = notify {
            let listener = crate::read(&self.listener).clone();
            if let Some(listener) = listener {
                listener(old, new, status);
            }
        }
        result
    }

    /// Record current usage; may trigger an automatic adjustment
    ///
    /// Returns the adjustment outcome when one was triggered.
    pub fn report_usage(&self, active_units: u32, error_rate: f64) -> Result<Option<AdjustOutcome>> {
        if !error_rate.is_finite() || error_rate < 0.0 {
            return Err(SchedulerError::invalid(format!(
                "error_rate must be a non-negative number, got {}",
                error_rate
            )));
        }

        let trigger = {
            let mut state = crate::lock(&self.state);
            state.stats.active_units = active_units;
            state.stats.record_error_rate(error_rate);
            state.stats.samples_since_adjustment += 1;
            state.auto && Self::should_adjust(&state, Some((active_units, error_rate)))
        };

        if trigger {
            self.adjust_now().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Driver hook for interval-based modes
    pub fn poll(&self) -> Result<Option<AdjustOutcome>> {
        let trigger = {
            let state = crate::lock(&self.state);
            state.auto && Self::should_adjust(&state, None)
        };
        if trigger {
            self.adjust_now().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn start_auto_adjust(&self) {
        let mut state = crate::lock(&self.state);
        state.auto = true;
        info!(mode = ?state.config.mode, "Automatic capacity adjustment enabled");
    }

    pub fn stop_auto_adjust(&self) {
        crate::lock(&self.state).auto = false;
        info!("Automatic capacity adjustment disabled");
    }

    pub fn is_auto_adjusting(&self) -> bool {
        crate::lock(&self.state).auto
    }

    /// `report` is `Some` when evaluating a usage report, `None` for a poll
    fn should_adjust(state: &AdjusterState, report: Option<(u32, f64)>) -> bool {
        let config = &state.config;
        match (config.mode, report) {
            (AllocationMode::Manual, _) => false,
            (AllocationMode::OnDemand, Some((active, error_rate))) => {
                active as f64 > ON_DEMAND_USAGE_TRIGGER * config.current_units as f64
                    || error_rate > config.error_tolerance
            }
            (AllocationMode::OnDemand, None) => false,
            (AllocationMode::Periodic, _) => state
                .last_adjustment
                .map(|last| last.elapsed() >= config.interval())
                .unwrap_or(true),
            (AllocationMode::Continuous, _) => true,
        }
    }
}
