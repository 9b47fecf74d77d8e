//! Usage sources feeding the resource monitor

use dashmap::DashMap;

use crate::models::ResourceType;

/// Provides raw utilisation readings as fractions in `[0, 1]`
///
/// `None` means the resource cannot be measured right now; the monitor keeps
/// its previous reading.
pub trait UsageSource: Send + Sync {
    fn sample(&self, resource: ResourceType) -> Option<f64>;
}

/// Readings pushed by an external telemetry system
#[derive(Debug, Default)]
pub struct ManualUsage {
    readings: DashMap<ResourceType, f64>,
}

impl ManualUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reading; it is served until replaced or cleared
    pub fn set(&self, resource: ResourceType, value: f64) {
        self.readings.insert(resource, value);
    }

    pub fn clear(&self, resource: ResourceType) {
        self.readings.remove(&resource);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl UsageSource for ManualUsage {
    fn sample(&self, resource: ResourceType) -> Option<f64> {
        self.readings.get(&resource).map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_usage() {
        let usage = ManualUsage::new();
        assert!(usage.sample(ResourceType::Cpu).is_none());

        usage.set(ResourceType::Cpu, 0.4);
        usage.set(ResourceType::Cpu, 0.6);
        assert_eq!(usage.sample(ResourceType::Cpu), Some(0.6));
        assert_eq!(usage.len(), 1);

        usage.clear(ResourceType::Cpu);
        assert!(usage.is_empty());
    }
}
