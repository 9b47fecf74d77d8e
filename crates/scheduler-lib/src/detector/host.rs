//! Capability and usage readings from the local host
//!
//! CPU, memory and disk figures come from `sysinfo`. Everything the OS does
//! not expose (link speed, disk throughput, power source, unit
//! hardware) is taken from a [`HostProfile`] supplied at construction.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::debug;

use super::CapabilityProvider;
use crate::models::{
    CoolingInfo, EnergyInfo, MemoryInfo, NetworkInfo, ProcessingInfo, ResourceType,
    StorageInfo, UnitHardwareInfo,
};
use crate::monitor::UsageSource;

/// Static facts about the host that cannot be probed through the OS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostProfile {
    /// Units backed per logical core when no dedicated hardware exists
    pub units_per_core: u32,
    /// Unit count offered by dedicated hardware; `None` when absent
    pub dedicated_units: Option<u32>,
    pub unit_error_rate: f64,
    pub unit_coherence_time_us: f64,
    pub storage_read_mbps: u64,
    pub storage_write_mbps: u64,
    pub network_bandwidth_mbps: u64,
    pub network_latency_ms: f64,
    pub battery_powered: bool,
}

impl Default for HostProfile {
    fn default() -> Self {
        Self {
            units_per_core: 4,
            dedicated_units: None,
            unit_error_rate: 0.001,
            unit_coherence_time_us: 0.0,
            storage_read_mbps: 0,
            storage_write_mbps: 0,
            network_bandwidth_mbps: 0,
            network_latency_ms: 0.0,
            battery_powered: false,
        }
    }
}

/// Provider backed by the operating system
pub struct HostProvider {
    profile: HostProfile,
    system: Mutex<System>,
}

impl HostProvider {
    pub fn new(profile: HostProfile) -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            profile,
            system: Mutex::new(system),
        }
    }

    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    fn logical_cores(&self) -> u32 {
        crate::lock(&self.system).cpus().len() as u32
    }

    /// Total and available bytes summed over all mounted disks
    fn disk_space() -> (u64, u64) {
        let disks = Disks::new_with_refreshed_list();
        disks.iter().fold((0, 0), |(total, available), disk| {
            (
                total.saturating_add(disk.total_space()),
                available.saturating_add(disk.available_space()),
            )
        })
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new(HostProfile::default())
    }
}

impl CapabilityProvider for HostProvider {
    fn name(&self) -> &str {
        "host"
    }

    fn processing(&self) -> Option<ProcessingInfo> {
        let mut sys = crate::lock(&self.system);
        sys.refresh_cpu_frequency();
        let cpus = sys.cpus();
        if cpus.is_empty() {
            return None;
        }
        Some(ProcessingInfo {
            cores: cpus.len() as u32,
            frequency_mhz: cpus.first().map(|c| c.frequency()).unwrap_or(0),
        })
    }

    fn memory(&self) -> Option<MemoryInfo> {
        let mut sys = crate::lock(&self.system);
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return None;
        }
        Some(MemoryInfo {
            total_bytes: total,
            available_bytes: sys.available_memory(),
        })
    }

    fn storage(&self) -> Option<StorageInfo> {
        let (total, available) = Self::disk_space();
        if total == 0 {
            return None;
        }
        Some(StorageInfo {
            total_bytes: total,
            available_bytes: available,
            read_speed_mbps: self.profile.storage_read_mbps,
            write_speed_mbps: self.profile.storage_write_mbps,
        })
    }

    fn network(&self) -> Option<NetworkInfo> {
        if self.profile.network_bandwidth_mbps == 0 {
            return None;
        }
        Some(NetworkInfo {
            bandwidth_mbps: self.profile.network_bandwidth_mbps,
            latency_ms: self.profile.network_latency_ms,
        })
    }

    fn energy(&self) -> Option<EnergyInfo> {
        // Mains-powered hosts report a full, constant level
        Some(EnergyInfo {
            battery_powered: self.profile.battery_powered,
            level: 1.0,
        })
    }

    fn cooling(&self) -> Option<CoolingInfo> {
        None
    }

    fn unit_hardware(&self) -> Option<UnitHardwareInfo> {
        let (dedicated, max_units) = match self.profile.dedicated_units {
            Some(units) => (true, units),
            None => (
                false,
                self.logical_cores()
                    .saturating_mul(self.profile.units_per_core),
            ),
        };
        Some(UnitHardwareInfo {
            has_dedicated_hardware: dedicated,
            max_units,
            error_rate: self.profile.unit_error_rate,
            coherence_time_us: self.profile.unit_coherence_time_us,
        })
    }
}

impl UsageSource for HostProvider {
    fn sample(&self, resource: ResourceType) -> Option<f64> {
        match resource {
            ResourceType::Cpu => {
                let mut sys = crate::lock(&self.system);
                sys.refresh_cpu_usage();
                let cpus = sys.cpus();
                if cpus.is_empty() {
                    return None;
                }
                let total: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
                Some((f64::from(total) / cpus.len() as f64 / 100.0).clamp(0.0, 1.0))
            }
            ResourceType::Memory => {
                let mut sys = crate::lock(&self.system);
                sys.refresh_memory();
                let total = sys.total_memory();
                if total == 0 {
                    return None;
                }
                let used = total.saturating_sub(sys.available_memory());
                Some(used as f64 / total as f64)
            }
            ResourceType::Storage => {
                let (total, available) = Self::disk_space();
                if total == 0 {
                    return None;
                }
                Some(total.saturating_sub(available) as f64 / total as f64)
            }
            other => {
                debug!(resource = %other, "Host provider has no reading for resource");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = HostProfile::default();
        assert_eq!(profile.units_per_core, 4);
        assert!(profile.dedicated_units.is_none());
    }

    #[test]
    fn test_dedicated_units_override_core_estimate() {
        let provider = HostProvider::new(HostProfile {
            dedicated_units: Some(127),
            unit_error_rate: 0.02,
            ..Default::default()
        });

        let hw = provider.unit_hardware().unwrap();
        assert!(hw.has_dedicated_hardware);
        assert_eq!(hw.max_units, 127);
        assert_eq!(hw.error_rate, 0.02);
    }

    #[test]
    fn test_network_requires_profile() {
        let provider = HostProvider::default();
        assert!(provider.network().is_none());

        let provider = HostProvider::new(HostProfile {
            network_bandwidth_mbps: 10_000,
            network_latency_ms: 0.2,
            ..Default::default()
        });
        assert_eq!(provider.network().unwrap().bandwidth_mbps, 10_000);
    }

    #[test]
    fn test_host_readings_are_fractions() {
        let provider = HostProvider::default();
        for resource in [ResourceType::Cpu, ResourceType::Memory, ResourceType::Storage] {
            if let Some(value) = provider.sample(resource) {
                assert!((0.0..=1.0).contains(&value), "{} = {}", resource, value);
            }
        }
        assert!(provider.sample(ResourceType::Thermal).is_none());
    }
}
