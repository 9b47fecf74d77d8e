//! Host capability detection
//!
//! The detector asks an injected [`CapabilityProvider`] for each sub-system
//! enabled in its [`DetectFlags`], merges the answers into the previous
//! snapshot, and notifies a listener when the host changed significantly.
//! It never spawns threads: continuous mode only records the desired cadence
//! and [`CapabilityDetector::tick`] is driven from outside.

mod fixed;
mod host;

pub use fixed::StaticProvider;
pub use host::{HostProfile, HostProvider};

use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};
use crate::models::{
    Capabilities, CoolingInfo, EnergyInfo, MemoryInfo, NetworkInfo, ProcessingInfo,
    StorageInfo, UnitHardwareInfo,
};

/// Source of capability readings
///
/// Each probe returns `None` when the sub-system is unavailable; the
/// detector stores that as zeroed fields.
pub trait CapabilityProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn processing(&self) -> Option<ProcessingInfo>;

    fn memory(&self) -> Option<MemoryInfo>;

    fn storage(&self) -> Option<StorageInfo>;

    fn network(&self) -> Option<NetworkInfo>;

    fn energy(&self) -> Option<EnergyInfo>;

    fn cooling(&self) -> Option<CoolingInfo>;

    fn unit_hardware(&self) -> Option<UnitHardwareInfo>;
}

/// Selects which sub-systems a detection pass probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectFlags {
    pub processing: bool,
    pub memory: bool,
    pub storage: bool,
    pub network: bool,
    pub energy: bool,
    pub cooling: bool,
    pub unit_hardware: bool,
}

impl DetectFlags {
    pub fn all() -> Self {
        Self {
            processing: true,
            memory: true,
            storage: true,
            network: true,
            energy: true,
            cooling: true,
            unit_hardware: true,
        }
    }

    pub fn none() -> Self {
        Self {
            processing: false,
            memory: false,
            storage: false,
            network: false,
            energy: false,
            cooling: false,
            unit_hardware: false,
        }
    }
}

impl Default for DetectFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Listener invoked with `(current, previous)` on a significant change
pub type ChangeListener = Arc<dyn Fn(&Capabilities, &Capabilities) + Send + Sync>;

#[derive(Debug, Default)]
struct DetectorState {
    flags: DetectFlags,
    last: Option<Capabilities>,
    continuous_interval: Option<Duration>,
    last_run: Option<Instant>,
    detections: u64,
    significant_changes: u64,
}

/// Detects host capabilities through a [`CapabilityProvider`]
pub struct CapabilityDetector {
    provider: Arc<dyn CapabilityProvider>,
    state: Mutex<DetectorState>,
    listener: RwLock<Option<ChangeListener>>,
}

impl CapabilityDetector {
    /// Create a detector that probes every sub-system
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(DetectorState::default()),
            listener: RwLock::new(None),
        }
    }

    /// Choose which sub-systems later passes probe
    pub fn configure(&self, flags: DetectFlags) {
        crate::lock(&self.state).flags = flags;
    }

    pub fn flags(&self) -> DetectFlags {
        crate::lock(&self.state).flags
    }

    /// Register the significant-change listener, replacing any previous one
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&Capabilities, &Capabilities) + Send + Sync + 'static,
    {
        *crate::write(&self.listener) = Some(Arc::new(listener));
    }

    /// Run one detection pass
    ///
    /// Disabled sub-systems keep the values of the previous snapshot. The
    /// change listener runs synchronously, after the internal lock has been
    /// released, and only when an earlier snapshot exists.
    pub fn run_detection(&self) -> Capabilities {
        let flags = self.flags();
        let probed = self.probe(&flags);

        let (current, previous) = {
            let mut state = crate::lock(&self.state);
            let previous = state.last.clone();
            let mut current = previous.clone().unwrap_or_default();
            merge(&mut current, probed);
            current.detected_at = Some(Utc::now());

            state.last = Some(current.clone());
            state.last_run = Some(Instant::now());
            state.detections += 1;

            let significant = previous
                .as_ref()
                .map(|p| current.is_significant_change(p))
                .unwrap_or(false);
            if significant {
                state.significant_changes += 1;
            }
            (current, previous.filter(|_| significant))
        };

        debug!(
            provider = self.provider.name(),
            cores = current.processing.cores,
            max_units = current.unit_hardware.max_units,
            "Capability detection complete"
        );

        if let Some(previous) = previous {
            info!(
                provider = self.provider.name(),
                cores = current.processing.cores,
                previous_cores = previous.processing.cores,
                max_units = current.unit_hardware.max_units,
                previous_max_units = previous.unit_hardware.max_units,
                "Significant capability change detected"
            );
            let listener = crate::read(&self.listener).clone();
            if let Some(listener) = listener {
                listener(&current, &previous);
            }
        }

        current
    }

    /// Latest snapshot; runs a detection first if none has happened yet
    pub fn last_capabilities(&self) -> Capabilities {
        let last = crate::lock(&self.state).last.clone();
        match last {
            Some(caps) => caps,
            None => self.run_detection(),
        }
    }

    /// Latest snapshot without triggering a detection
    pub fn peek(&self) -> Option<Capabilities> {
        crate::lock(&self.state).last.clone()
    }

    /// Enable continuous mode with the given cadence
    pub fn start_continuous(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(SchedulerError::invalid(
                "continuous detection interval must be positive",
            ));
        }
        crate::lock(&self.state).continuous_interval = Some(interval);
        info!(
            interval_ms = interval.as_millis() as u64,
            "Continuous capability detection enabled"
        );
        Ok(())
    }

    pub fn stop_continuous(&self) {
        crate::lock(&self.state).continuous_interval = None;
        info!("Continuous capability detection disabled");
    }

    pub fn is_continuous(&self) -> bool {
        crate::lock(&self.state).continuous_interval.is_some()
    }

    /// Whether a continuous-mode pass is due
    pub fn detection_due(&self) -> bool {
        let state = crate::lock(&self.state);
        match (state.continuous_interval, state.last_run) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(interval), Some(last)) => last.elapsed() >= interval,
        }
    }

    /// Driver hook: runs a detection when continuous mode says one is due
    pub fn tick(&self) -> Option<Capabilities> {
        if self.detection_due() {
            Some(self.run_detection())
        } else {
            None
        }
    }

    pub fn stats(&self) -> DetectorStats {
        let state = crate::lock(&self.state);
        DetectorStats {
            detections: state.detections,
            significant_changes: state.significant_changes,
            continuous: state.continuous_interval.is_some(),
        }
    }

    fn probe(&self, flags: &DetectFlags) -> Probed {
        let p = &self.provider;
        Probed {
            processing: flags.processing.then(|| p.processing().unwrap_or_default()),
            memory: flags.memory.then(|| p.memory().unwrap_or_default()),
            storage: flags.storage.then(|| p.storage().unwrap_or_default()),
            network: flags.network.then(|| p.network().unwrap_or_default()),
            energy: flags.energy.then(|| p.energy().unwrap_or_default()),
            cooling: flags.cooling.then(|| p.cooling().unwrap_or_default()),
            unit_hardware: flags
                .unit_hardware
                .then(|| p.unit_hardware().unwrap_or_default()),
        }
    }
}

/// Counters describing detector activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorStats {
    pub detections: u64,
    pub significant_changes: u64,
    pub continuous: bool,
}

/// Readings of the enabled sub-systems
struct Probed {
    processing: Option<ProcessingInfo>,
    memory: Option<MemoryInfo>,
    storage: Option<StorageInfo>,
    network: Option<NetworkInfo>,
    energy: Option<EnergyInfo>,
    cooling: Option<CoolingInfo>,
    unit_hardware: Option<UnitHardwareInfo>,
}

fn merge(target: &mut Capabilities, probed: Probed) {
    if let Some(v) = probed.processing {
        target.processing = v;
    }
    if let Some(v) = probed.memory {
        target.memory = v;
    }
    if let Some(v) = probed.storage {
        target.storage = v;
    }
    if let Some(v) = probed.network {
        target.network = v;
    }
    if let Some(v) = probed.energy {
        target.energy = v;
    }
    if let Some(v) = probed.cooling {
        target.cooling = v;
    }
    if let Some(v) = probed.unit_hardware {
        target.unit_hardware = v;
    }
}
