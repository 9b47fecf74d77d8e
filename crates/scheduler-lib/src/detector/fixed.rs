//! Injectable capability provider
//!
//! Serves a snapshot supplied by the caller. Used when capability data comes
//! from an external telemetry system, in simulations, and in tests.

use std::sync::RwLock;

use super::{CapabilityProvider, DetectFlags};
use crate::models::{
    Capabilities, CoolingInfo, EnergyInfo, MemoryInfo, NetworkInfo, ProcessingInfo,
    StorageInfo, UnitHardwareInfo,
};

/// Provider returning a replaceable, caller-supplied snapshot
pub struct StaticProvider {
    snapshot: RwLock<Capabilities>,
    available: RwLock<DetectFlags>,
}

impl StaticProvider {
    pub fn new(snapshot: Capabilities) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
            available: RwLock::new(DetectFlags::all()),
        }
    }

    /// Replace the served snapshot
    pub fn set(&self, snapshot: Capabilities) {
        *crate::write(&self.snapshot) = snapshot;
    }

    /// Modify the served snapshot in place
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Capabilities),
    {
        f(&mut crate::write(&self.snapshot));
    }

    /// Mark sub-systems as present (`true`) or unavailable (`false`)
    pub fn set_available(&self, available: DetectFlags) {
        *crate::write(&self.available) = available;
    }

    fn serve<T>(&self, enabled: fn(&DetectFlags) -> bool, pick: fn(&Capabilities) -> T) -> Option<T> {
        if enabled(&crate::read(&self.available)) {
            Some(pick(&crate::read(&self.snapshot)))
        } else {
            None
        }
    }
}

impl Default for StaticProvider {
    fn default() -> Self {
        Self::new(Capabilities::default())
    }
}

impl CapabilityProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn processing(&self) -> Option<ProcessingInfo> {
        self.serve(|f| f.processing, |c| c.processing)
    }

    fn memory(&self) -> Option<MemoryInfo> {
        self.serve(|f| f.memory, |c| c.memory)
    }

    fn storage(&self) -> Option<StorageInfo> {
        self.serve(|f| f.storage, |c| c.storage)
    }

    fn network(&self) -> Option<NetworkInfo> {
        self.serve(|f| f.network, |c| c.network)
    }

    fn energy(&self) -> Option<EnergyInfo> {
        self.serve(|f| f.energy, |c| c.energy)
    }

    fn cooling(&self) -> Option<CoolingInfo> {
        self.serve(|f| f.cooling, |c| c.cooling)
    }

    fn unit_hardware(&self) -> Option<UnitHardwareInfo> {
        self.serve(|f| f.unit_hardware, |c| c.unit_hardware)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_in_place() {
        let provider = StaticProvider::default();
        provider.update(|caps| caps.unit_hardware.max_units = 12);

        assert_eq!(provider.unit_hardware().unwrap().max_units, 12);
        assert_eq!(provider.processing().unwrap().cores, 0);
    }

    #[test]
    fn test_unavailable_subsystems_return_none() {
        let provider = StaticProvider::default();
        provider.set_available(DetectFlags {
            network: false,
            ..DetectFlags::all()
        });

        assert!(provider.network().is_none());
        assert!(provider.memory().is_some());
    }
}
