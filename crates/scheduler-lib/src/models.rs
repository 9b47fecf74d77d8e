//! Core data models for the scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relative change of available memory that counts as significant
pub const SIGNIFICANT_MEMORY_DELTA: f64 = 0.10;

/// Processing capability of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub cores: u32,
    pub frequency_mhz: u64,
}

/// Memory capability of the host, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Storage capability of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub read_speed_mbps: u64,
    pub write_speed_mbps: u64,
}

/// Network capability of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub bandwidth_mbps: u64,
    pub latency_ms: f64,
}

/// Power source of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyInfo {
    pub battery_powered: bool,
    /// Charge level in [0, 1]
    pub level: f64,
}

/// Thermal state of the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoolingInfo {
    pub temperature_c: f64,
    pub max_safe_temperature_c: f64,
}

/// Descriptor of the hardware backing allocatable units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitHardwareInfo {
    pub has_dedicated_hardware: bool,
    pub max_units: u32,
    pub error_rate: f64,
    pub coherence_time_us: f64,
}

/// Point-in-time description of host resources
///
/// Every detection pass produces a new snapshot. Sub-systems that could not
/// be probed are left zeroed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub processing: ProcessingInfo,
    pub memory: MemoryInfo,
    pub storage: StorageInfo,
    pub network: NetworkInfo,
    pub energy: EnergyInfo,
    pub cooling: CoolingInfo,
    pub unit_hardware: UnitHardwareInfo,
    pub detected_at: Option<DateTime<Utc>>,
}

impl Capabilities {
    /// Maximum number of units the host can back
    pub fn max_supported_units(&self) -> u32 {
        self.unit_hardware.max_units
    }

    /// Whether this snapshot differs significantly from `previous`
    ///
    /// Significant means: a different core count, more than 10% movement of
    /// available memory, a different unit maximum, or a flip of the
    /// dedicated-hardware flag.
    pub fn is_significant_change(&self, previous: &Capabilities) -> bool {
        if self.processing.cores != previous.processing.cores {
            return true;
        }
        if self.unit_hardware.max_units != previous.unit_hardware.max_units {
            return true;
        }
        if self.unit_hardware.has_dedicated_hardware
            != previous.unit_hardware.has_dedicated_hardware
        {
            return true;
        }

        let before = previous.memory.available_bytes as f64;
        let after = self.memory.available_bytes as f64;
        if before == 0.0 {
            return after > 0.0;
        }
        ((after - before).abs() / before) > SIGNIFICANT_MEMORY_DELTA
    }
}

/// Kind of resource tracked by the monitor and offered by resource units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Cpu,
    Memory,
    Storage,
    Network,
    Energy,
    Thermal,
    Units,
}

impl ResourceType {
    pub const ALL: [ResourceType; 7] = [
        ResourceType::Cpu,
        ResourceType::Memory,
        ResourceType::Storage,
        ResourceType::Network,
        ResourceType::Energy,
        ResourceType::Thermal,
        ResourceType::Units,
    ];

    /// Valid utilisation range for readings of this resource
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            ResourceType::Cpu => (0.05, 0.95),
            ResourceType::Memory => (0.10, 0.95),
            _ => (0.0, 1.0),
        }
    }

    /// Clamp a raw reading into the valid range
    pub fn clamp_usage(&self, raw: f64) -> f64 {
        let (low, high) = self.valid_range();
        if raw.is_nan() {
            return low;
        }
        raw.clamp(low, high)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Cpu => write!(f, "cpu"),
            ResourceType::Memory => write!(f, "memory"),
            ResourceType::Storage => write!(f, "storage"),
            ResourceType::Network => write!(f, "network"),
            ResourceType::Energy => write!(f, "energy"),
            ResourceType::Thermal => write!(f, "thermal"),
            ResourceType::Units => write!(f, "units"),
        }
    }
}

/// Severity attached to thresholds and alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Kind of work carried by a task
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Computation,
    Memory,
    Io,
    Network,
    Mixed,
}

/// Task priority; higher values are scheduled first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl TaskPriority {
    pub fn weight(&self) -> f64 {
        *self as u8 as f64
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Assigned => 1,
            TaskStatus::Running => 2,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => 3,
        }
    }

    /// Transitions only move forward; terminal states are final
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(cores: u32, available: u64, max_units: u32) -> Capabilities {
        Capabilities {
            processing: ProcessingInfo {
                cores,
                frequency_mhz: 3000,
            },
            memory: MemoryInfo {
                total_bytes: 16_000,
                available_bytes: available,
            },
            unit_hardware: UnitHardwareInfo {
                max_units,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_significant_change_rules() {
        let base = caps(8, 10_000, 32);

        assert!(!caps(8, 10_500, 32).is_significant_change(&base));
        assert!(caps(8, 11_500, 32).is_significant_change(&base));
        assert!(caps(8, 8_000, 32).is_significant_change(&base));
        assert!(caps(4, 10_000, 32).is_significant_change(&base));
        assert!(caps(8, 10_000, 30).is_significant_change(&base));

        let mut flipped = base.clone();
        flipped.unit_hardware.has_dedicated_hardware = true;
        assert!(flipped.is_significant_change(&base));
    }

    #[test]
    fn test_cpu_usage_clamped() {
        assert_eq!(ResourceType::Cpu.clamp_usage(0.0), 0.05);
        assert_eq!(ResourceType::Cpu.clamp_usage(1.0), 0.95);
        assert_eq!(ResourceType::Cpu.clamp_usage(0.85), 0.85);
        assert_eq!(ResourceType::Storage.clamp_usage(1.2), 1.0);
        assert_eq!(ResourceType::Cpu.clamp_usage(f64::NAN), 0.05);
    }

    #[test]
    fn test_status_transitions_forward_only() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Assigned));
        assert!(TaskStatus::Assigned.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert_eq!(TaskPriority::High.weight(), 2.0);
    }
}
