//! Balancer statistics

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::task::Task;
use crate::models::{TaskStatus, TaskType};

/// Counters and running averages of task processing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalancerStats {
    pub tasks_created: u64,
    /// Tasks that reached Completed or Failed
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    /// Creations refused because the pending queue was full
    pub tasks_rejected: u64,
    pub avg_waiting_time_ms: f64,
    pub avg_processing_time_ms: f64,
    /// Processed tasks per type
    pub load_distribution: BTreeMap<TaskType, u64>,
    pub rebalances: u64,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub resource_units: usize,
    pub active_units: usize,
}

impl BalancerStats {
    /// Fold a task that just finished running into the counters
    pub(crate) fn record_finished(&mut self, task: &Task) {
        self.tasks_processed += 1;
        match task.status {
            TaskStatus::Completed => self.tasks_succeeded += 1,
            TaskStatus::Failed => self.tasks_failed += 1,
            _ => {}
        }
        *self.load_distribution.entry(task.task_type).or_insert(0) += 1;

        let n = self.tasks_processed as f64;
        if let Some(waiting) = task.waiting_time_ms() {
            self.avg_waiting_time_ms += (waiting as f64 - self.avg_waiting_time_ms) / n;
        }
        if let Some(processing) = task.actual_duration_ms {
            self.avg_processing_time_ms += (processing as f64 - self.avg_processing_time_ms) / n;
        }
    }
}

/// Success/failure outcomes of the most recent finished tasks
#[derive(Debug)]
pub(crate) struct OutcomeWindow {
    size: usize,
    outcomes: VecDeque<bool>,
}

impl OutcomeWindow {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            outcomes: VecDeque::with_capacity(size),
        }
    }

    pub fn resize(&mut self, size: usize) {
        self.size = size;
        while self.outcomes.len() > size {
            self.outcomes.pop_front();
        }
    }

    pub fn push(&mut self, success: bool) {
        self.outcomes.push_back(success);
        while self.outcomes.len() > self.size {
            self.outcomes.pop_front();
        }
    }

    /// Share of failures; 0 without any outcome
    pub fn failure_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failed = self.outcomes.iter().filter(|ok| !**ok).count();
        failed as f64 / self.outcomes.len() as f64
    }
}
