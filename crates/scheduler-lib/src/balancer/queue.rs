//! Bounded FIFO task queue

use std::collections::VecDeque;

use super::scoring::{task_score, ScoringWeights};
use super::task::{Task, TaskId};
use crate::error::{Result, SchedulerError};

/// FIFO queue owning the tasks it holds
#[derive(Debug)]
pub(crate) struct TaskQueue {
    name: &'static str,
    capacity: usize,
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            tasks: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_full(&self) -> bool {
        self.tasks.len() >= self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Append, failing when the queue is at capacity
    pub fn push(&mut self, task: Task) -> Result<()> {
        if self.is_full() {
            return Err(SchedulerError::QueueFull {
                queue: self.name,
                capacity: self.capacity,
            });
        }
        self.tasks.push_back(task);
        Ok(())
    }

    /// Append without a capacity check; callers check `is_full` first
    pub fn push_unchecked(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Append, evicting from the front when at capacity
    pub fn push_evicting(&mut self, task: Task) -> Vec<Task> {
        let mut evicted = Vec::new();
        while self.capacity > 0 && self.tasks.len() >= self.capacity {
            if let Some(old) = self.tasks.pop_front() {
                evicted.push(old);
            }
        }
        self.tasks.push_back(task);
        evicted
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let index = self.tasks.iter().position(|t| t.id == id)?;
        self.tasks.remove(index)
    }

    /// Remove every task, front to back
    pub fn take_all(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Stable sort by descending task score; FIFO order within a score
    pub fn sort_by_score(&mut self, weights: &ScoringWeights) {
        self.tasks.make_contiguous().sort_by(|a, b| {
            task_score(b.priority, weights).total_cmp(&task_score(a.priority, weights))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskPriority, TaskType};

    fn task(id: TaskId, priority: TaskPriority) -> Task {
        Task::new(id, TaskType::Computation, priority, 1.0, 0, serde_json::Value::Null)
    }

    #[test]
    fn test_push_respects_capacity() {
        let mut queue = TaskQueue::new("pending", 2);
        queue.push(task(1, TaskPriority::Low)).unwrap();
        queue.push(task(2, TaskPriority::Low)).unwrap();
        let err = queue.push(task(3, TaskPriority::Low)).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::QueueFull {
                queue: "pending",
                capacity: 2
            }
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_push_evicting_drops_oldest() {
        let mut queue = TaskQueue::new("completed", 2);
        assert!(queue.push_evicting(task(1, TaskPriority::Low)).is_empty());
        assert!(queue.push_evicting(task(2, TaskPriority::Low)).is_empty());
        let evicted = queue.push_evicting(task(3, TaskPriority::Low));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, 1);
        assert!(queue.get(1).is_none());
        assert!(queue.get(3).is_some());
    }

    #[test]
    fn test_sort_is_stable_within_priority() {
        let mut queue = TaskQueue::new("pending", 10);
        for (id, p) in [
            (1, TaskPriority::Normal),
            (2, TaskPriority::High),
            (3, TaskPriority::Normal),
            (4, TaskPriority::Critical),
            (5, TaskPriority::High),
        ] {
            queue.push(task(id, p)).unwrap();
        }
        queue.sort_by_score(&ScoringWeights::default());
        let order: Vec<TaskId> = queue.iter().map(|t| t.id).collect();
        assert_eq!(order, vec![4, 2, 5, 1, 3]);
    }
}
