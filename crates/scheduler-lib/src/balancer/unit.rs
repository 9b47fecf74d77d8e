//! Resource units offering capacity to tasks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::ResourceType;

pub type UnitId = u64;

const CAPACITY_EPSILON: f64 = 1e-9;

/// A pool member that tasks reserve capacity on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub id: UnitId,
    pub resource_type: ResourceType,
    pub total_capacity: f64,
    /// Never exceeds `total_capacity`
    pub available_capacity: f64,
    pub performance_rating: f64,
    pub efficiency_rating: f64,
    pub active: bool,
    pub last_update: DateTime<Utc>,
}

impl ResourceUnit {
    pub(crate) fn new(
        id: UnitId,
        resource_type: ResourceType,
        capacity: f64,
        performance_rating: f64,
        efficiency_rating: f64,
    ) -> Self {
        Self {
            id,
            resource_type,
            total_capacity: capacity,
            available_capacity: capacity,
            performance_rating,
            efficiency_rating,
            active: true,
            last_update: Utc::now(),
        }
    }

    pub fn can_host(&self, demand: f64) -> bool {
        self.active && self.available_capacity >= demand
    }

    pub fn used_capacity(&self) -> f64 {
        self.total_capacity - self.available_capacity
    }

    pub(crate) fn reserve(&mut self, demand: f64) {
        self.available_capacity = (self.available_capacity - demand).max(0.0);
        self.last_update = Utc::now();
    }

    /// Return `demand` to the unit; true when the result had to be clamped
    /// to `total_capacity`
    pub(crate) fn release(&mut self, demand: f64) -> bool {
        let restored = self.available_capacity + demand;
        let clamped = restored > self.total_capacity + CAPACITY_EPSILON;
        if clamped {
            warn!(
                unit_id = self.id,
                demand,
                available = self.available_capacity,
                total = self.total_capacity,
                "Released capacity exceeds unit total, clamping"
            );
        }
        self.available_capacity = restored.min(self.total_capacity);
        self.last_update = Utc::now();
        clamped
    }
}
