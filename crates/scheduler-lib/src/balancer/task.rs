//! Task record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{TaskPriority, TaskStatus, TaskType};

pub type TaskId = u64;

/// A unit of work waiting for, holding or done with resource capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Capacity reserved on the assigned unit while running
    pub resource_demand: f64,
    pub expected_duration_ms: u64,
    pub actual_duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub assigned_unit_id: Option<u64>,
    /// Opaque data carried for the caller
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        task_type: TaskType,
        priority: TaskPriority,
        resource_demand: f64,
        expected_duration_ms: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            task_type,
            priority,
            status: TaskStatus::Pending,
            resource_demand,
            expected_duration_ms,
            actual_duration_ms: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            assigned_unit_id: None,
            payload,
        }
    }

    /// Move forward to `next`; backward or post-terminal moves are ignored
    pub(crate) fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        match next {
            TaskStatus::Running => self.started_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.finished_at = Some(now);
                if let Some(started) = self.started_at {
                    let ms = (now - started).num_milliseconds().max(0);
                    self.actual_duration_ms = Some(ms as u64);
                }
            }
            TaskStatus::Pending | TaskStatus::Assigned => {}
        }
        self.status = next;
        true
    }

    /// Milliseconds between creation and start
    pub fn waiting_time_ms(&self) -> Option<u64> {
        self.started_at
            .map(|s| (s - self.created_at).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_moves_forward() {
        let mut task = Task::new(
            1,
            TaskType::Io,
            TaskPriority::Normal,
            5.0,
            100,
            serde_json::Value::Null,
        );
        assert!(task.advance(TaskStatus::Assigned));
        assert!(task.advance(TaskStatus::Running));
        assert!(task.started_at.is_some());
        assert!(!task.advance(TaskStatus::Assigned));
        assert!(task.advance(TaskStatus::Completed));
        assert!(task.actual_duration_ms.is_some());
        assert!(!task.advance(TaskStatus::Failed));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_cancelled_pending_task_has_no_duration() {
        let mut task = Task::new(
            2,
            TaskType::Mixed,
            TaskPriority::Low,
            1.0,
            0,
            serde_json::json!({"job": "reindex"}),
        );
        assert!(task.advance(TaskStatus::Cancelled));
        assert!(task.actual_duration_ms.is_none());
        assert!(task.waiting_time_ms().is_none());
        assert_eq!(task.payload["job"], "reindex");
    }
}
