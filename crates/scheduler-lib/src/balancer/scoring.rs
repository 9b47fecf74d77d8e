//! Weighted scoring of tasks and resource units

use serde::{Deserialize, Serialize};

use super::unit::{ResourceUnit, UnitId};
use crate::models::TaskPriority;

/// Weights of the scoring terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub priority_weight: f64,
    pub performance_weight: f64,
    pub efficiency_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            priority_weight: 1.0,
            performance_weight: 0.6,
            efficiency_weight: 0.4,
        }
    }
}

pub fn task_score(priority: TaskPriority, weights: &ScoringWeights) -> f64 {
    weights.priority_weight * priority.weight()
}

pub fn unit_score(unit: &ResourceUnit, weights: &ScoringWeights) -> f64 {
    weights.performance_weight * unit.performance_rating
        + weights.efficiency_weight * unit.efficiency_rating
}

/// Best unit able to host `demand`; ties go to the lowest id
///
/// `units` must be ordered by ascending id.
pub fn select_unit<'a, I>(units: I, demand: f64, weights: &ScoringWeights) -> Option<UnitId>
where
    I: IntoIterator<Item = &'a ResourceUnit>,
{
    let mut best: Option<(UnitId, f64)> = None;
    for unit in units {
        if !unit.can_host(demand) {
            continue;
        }
        let score = unit_score(unit, weights);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((unit.id, score)),
        }
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceType;

    fn unit(id: UnitId, capacity: f64, perf: f64, eff: f64) -> ResourceUnit {
        ResourceUnit::new(id, ResourceType::Cpu, capacity, perf, eff)
    }

    #[test]
    fn test_highest_score_wins() {
        let units = vec![unit(1, 100.0, 0.5, 0.5), unit(2, 100.0, 0.9, 0.8)];
        assert_eq!(select_unit(&units, 10.0, &ScoringWeights::default()), Some(2));
    }

    #[test]
    fn test_ties_go_to_lowest_id() {
        let units = vec![
            unit(3, 100.0, 0.7, 0.7),
            unit(5, 100.0, 0.7, 0.7),
            unit(8, 100.0, 0.7, 0.7),
        ];
        assert_eq!(select_unit(&units, 10.0, &ScoringWeights::default()), Some(3));
    }

    #[test]
    fn test_capacity_and_activity_gate() {
        let mut idle = unit(1, 100.0, 1.0, 1.0);
        idle.active = false;
        let small = unit(2, 5.0, 1.0, 1.0);
        let fits = unit(3, 50.0, 0.1, 0.1);
        let units = vec![idle, small, fits];
        assert_eq!(select_unit(&units, 10.0, &ScoringWeights::default()), Some(3));
        assert_eq!(select_unit(&units, 60.0, &ScoringWeights::default()), None);
    }

    #[test]
    fn test_task_score_follows_priority() {
        let w = ScoringWeights {
            priority_weight: 2.0,
            ..Default::default()
        };
        assert_eq!(task_score(TaskPriority::Low, &w), 0.0);
        assert_eq!(task_score(TaskPriority::Critical, &w), 6.0);
    }
}
