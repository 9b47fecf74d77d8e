//! Task balancing across a pool of resource units
//!
//! The [`TaskBalancer`] owns three bounded queues (pending, running,
//! completed) and the unit pool. Pending tasks are placed on the best-scoring
//! unit with enough free capacity, highest priority first and FIFO within a
//! priority. Tasks that fit no unit stay pending without blocking the
//! tasks behind them.
//!
//! When the capacity adjuster has allocated units, that count caps the
//! number of running tasks, and every rebalance reports the running count
//! and recent failure ratio back to the adjuster.

mod queue;
mod scoring;
mod stats;
mod task;
mod unit;

pub use scoring::{select_unit, task_score, unit_score, ScoringWeights};
pub use stats::BalancerStats;
pub use task::{Task, TaskId};
pub use unit::{ResourceUnit, UnitId};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adjuster::CapacityAdjuster;
use crate::detector::CapabilityDetector;
use crate::error::{check_unit_interval, Result, SchedulerError};
use crate::models::{ResourceType, TaskPriority, TaskStatus, TaskType};
use crate::monitor::ResourceMonitor;
use queue::TaskQueue;
use stats::OutcomeWindow;

/// Capacity of a provisioned CPU unit per logical core
const CPU_CAPACITY_PER_CORE: f64 = 100.0;

/// Clock rate rated as full CPU performance
const REFERENCE_FREQUENCY_MHZ: f64 = 4000.0;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Balancer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Capacity of each task queue
    pub max_queue_size: usize,
    pub rebalance_interval_ms: u64,
    /// Allow cancelling running tasks
    pub enable_preemption: bool,
    pub weights: ScoringWeights,
    /// Finished tasks considered for the failure ratio reported upstream
    pub failure_window: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            rebalance_interval_ms: 5000,
            enable_preemption: false,
            weights: ScoringWeights::default(),
            failure_window: 20,
        }
    }
}

impl BalancerConfig {
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(SchedulerError::invalid("max_queue_size must be positive"));
        }
        if self.failure_window == 0 {
            return Err(SchedulerError::invalid("failure_window must be positive"));
        }
        let w = &self.weights;
        for (name, value) in [
            ("priority_weight", w.priority_weight),
            ("performance_weight", w.performance_weight),
            ("efficiency_weight", w.efficiency_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SchedulerError::invalid(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Invoked once with the task when it completes, fails or is cancelled
pub type CompletionCallback = Box<dyn FnOnce(&Task) + Send>;

/// Called with every task that reaches a terminal state
pub type TaskListener = Arc<dyn Fn(&Task) + Send + Sync>;

struct BalancerState {
    config: BalancerConfig,
    active: bool,
    pending: TaskQueue,
    running: TaskQueue,
    completed: TaskQueue,
    units: BTreeMap<UnitId, ResourceUnit>,
    next_task_id: TaskId,
    next_unit_id: UnitId,
    callbacks: HashMap<TaskId, CompletionCallback>,
    stats: BalancerStats,
    outcomes: OutcomeWindow,
    last_rebalance: Option<Instant>,
}

impl BalancerState {
    fn new(config: BalancerConfig) -> Self {
        Self {
            pending: TaskQueue::new("pending", config.max_queue_size),
            running: TaskQueue::new("running", config.max_queue_size),
            completed: TaskQueue::new("completed", config.max_queue_size),
            outcomes: OutcomeWindow::new(config.failure_window),
            config,
            active: false,
            units: BTreeMap::new(),
            next_task_id: 1,
            next_unit_id: 1,
            callbacks: HashMap::new(),
            stats: BalancerStats::default(),
            last_rebalance: None,
        }
    }

    fn find_task(&self, id: TaskId) -> Option<&Task> {
        self.pending
            .get(id)
            .or_else(|| self.running.get(id))
            .or_else(|| self.completed.get(id))
    }

    /// Place pending tasks in score order
    ///
    /// Tasks no unit can host stay pending in their relative order while
    /// later tasks are still tried. `unit_cap` limits the running queue to
    /// the adjuster's allocation.
    fn allocate(&mut self, unit_cap: Option<usize>) -> Vec<(TaskId, UnitId)> {
        let weights = self.config.weights;
        self.pending.sort_by_score(&weights);

        let mut started = Vec::new();
        let mut tasks = self.pending.take_all().into_iter();
        for mut task in tasks.by_ref() {
            if self.running.is_full() || unit_cap.is_some_and(|cap| self.running.len() >= cap) {
                self.pending.push_unchecked(task);
                break;
            }
            let Some(unit_id) = select_unit(self.units.values(), task.resource_demand, &weights)
            else {
                self.pending.push_unchecked(task);
                continue;
            };
            if let Some(unit) = self.units.get_mut(&unit_id) {
                unit.reserve(task.resource_demand);
            }
            task.assigned_unit_id = Some(unit_id);
            task.advance(TaskStatus::Assigned);
            task.advance(TaskStatus::Running);
            started.push((task.id, unit_id));
            self.running.push_unchecked(task);
        }
        for task in tasks {
            self.pending.push_unchecked(task);
        }
        started
    }

    fn insert_unit(
        &mut self,
        resource_type: ResourceType,
        capacity: f64,
        performance_rating: f64,
        efficiency_rating: f64,
    ) -> UnitId {
        let id = self.next_unit_id;
        self.next_unit_id += 1;
        self.units.insert(
            id,
            ResourceUnit::new(
                id,
                resource_type,
                capacity,
                performance_rating,
                efficiency_rating,
            ),
        );
        info!(unit_id = id, resource = %resource_type, capacity, "Resource unit added");
        id
    }

    /// Return a task's reservation to its unit
    fn release(&mut self, task: &Task) -> Option<ResourceType> {
        let unit = self.units.get_mut(&task.assigned_unit_id?)?;
        unit.release(task.resource_demand);
        Some(unit.resource_type)
    }

    /// Move a terminal task into the completed queue
    fn retire(&mut self, task: Task) {
        for evicted in self.completed.push_evicting(task) {
            self.callbacks.remove(&evicted.id);
        }
    }
}

/// Assigns tasks to resource units and rebalances on demand
pub struct TaskBalancer {
    monitor: Arc<ResourceMonitor>,
    detector: Arc<CapabilityDetector>,
    adjuster: Arc<CapacityAdjuster>,
    state: Mutex<BalancerState>,
    listener: RwLock<Option<TaskListener>>,
}

impl TaskBalancer {
    pub fn new(
        monitor: Arc<ResourceMonitor>,
        detector: Arc<CapabilityDetector>,
        adjuster: Arc<CapacityAdjuster>,
    ) -> Self {
        Self {
            monitor,
            detector,
            adjuster,
            state: Mutex::new(BalancerState::new(BalancerConfig::default())),
            listener: RwLock::new(None),
        }
    }

    pub fn with_config(
        monitor: Arc<ResourceMonitor>,
        detector: Arc<CapabilityDetector>,
        adjuster: Arc<CapacityAdjuster>,
        config: BalancerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            monitor,
            detector,
            adjuster,
            state: Mutex::new(BalancerState::new(config)),
            listener: RwLock::new(None),
        })
    }

    pub fn set_config(&self, config: BalancerConfig) -> Result<()> {
        config.validate()?;
        let mut state = crate::lock(&self.state);
        state.pending.set_capacity(config.max_queue_size);
        state.running.set_capacity(config.max_queue_size);
        state.completed.set_capacity(config.max_queue_size);
        state.outcomes.resize(config.failure_window);
        state.config = config;
        Ok(())
    }

    pub fn config(&self) -> BalancerConfig {
        crate::lock(&self.state).config.clone()
    }

    /// Register the finished-task listener, replacing any previous one
    ///
    /// Runs after per-task completion callbacks, outside the balancer lock.
    pub fn on_task_finished<F>(&self, listener: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        *crate::write(&self.listener) = Some(Arc::new(listener));
    }

    /// Activate and run a rebalance pass
    pub fn start(&self) {
        crate::lock(&self.state).active = true;
        info!("Task balancer started");
        self.force_rebalance();
    }

    pub fn stop(&self) {
        crate::lock(&self.state).active = false;
        info!("Task balancer stopped");
    }

    pub fn is_active(&self) -> bool {
        crate::lock(&self.state).active
    }

    pub fn add_resource_unit(
        &self,
        resource_type: ResourceType,
        capacity: f64,
        performance_rating: f64,
        efficiency_rating: f64,
    ) -> Result<UnitId> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(SchedulerError::invalid(format!(
                "capacity must be positive, got {}",
                capacity
            )));
        }
        check_unit_interval("performance_rating", performance_rating)?;
        check_unit_interval("efficiency_rating", efficiency_rating)?;

        let cap = self.unit_cap();
        let mut state = crate::lock(&self.state);
        let id = state.insert_unit(
            resource_type,
            capacity,
            performance_rating,
            efficiency_rating,
        );

        if state.active {
            state.allocate(cap);
        }
        Ok(id)
    }

    /// Remove a unit; refused while tasks run on it
    pub fn remove_resource_unit(&self, id: UnitId) -> Result<ResourceUnit> {
        let mut state = crate::lock(&self.state);
        if !state.units.contains_key(&id) {
            return Err(SchedulerError::not_found("resource unit", id));
        }
        let busy = state
            .running
            .iter()
            .filter(|t| t.assigned_unit_id == Some(id))
            .count();
        if busy > 0 {
            return Err(SchedulerError::invalid(format!(
                "resource unit {} still runs {} task(s)",
                id, busy
            )));
        }
        let unit = state
            .units
            .remove(&id)
            .ok_or_else(|| SchedulerError::not_found("resource unit", id))?;
        info!(unit_id = id, "Resource unit removed");
        Ok(unit)
    }

    /// Overwrite a unit's free capacity and ratings with external readings
    pub fn update_resource_unit(
        &self,
        id: UnitId,
        available_capacity: f64,
        performance_rating: f64,
        efficiency_rating: f64,
    ) -> Result<()> {
        check_unit_interval("performance_rating", performance_rating)?;
        check_unit_interval("efficiency_rating", efficiency_rating)?;

        let mut state = crate::lock(&self.state);
        let unit = state
            .units
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::not_found("resource unit", id))?;
        if !available_capacity.is_finite()
            || available_capacity < 0.0
            || available_capacity > unit.total_capacity
        {
            return Err(SchedulerError::invalid(format!(
                "available capacity {} outside [0, {}]",
                available_capacity, unit.total_capacity
            )));
        }
        unit.available_capacity = available_capacity;
        unit.performance_rating = performance_rating;
        unit.efficiency_rating = efficiency_rating;
        unit.last_update = chrono::Utc::now();
        debug!(unit_id = id, available_capacity, "Resource unit updated");
        Ok(())
    }

    pub fn set_unit_active(&self, id: UnitId, active: bool) -> Result<()> {
        let mut state = crate::lock(&self.state);
        let unit = state
            .units
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::not_found("resource unit", id))?;
        unit.active = active;
        unit.last_update = chrono::Utc::now();
        Ok(())
    }

    pub fn resource_unit(&self, id: UnitId) -> Option<ResourceUnit> {
        crate::lock(&self.state).units.get(&id).cloned()
    }

    pub fn resource_units(&self) -> Vec<ResourceUnit> {
        crate::lock(&self.state).units.values().cloned().collect()
    }

    /// Seed a CPU and a memory unit from the detected capabilities
    ///
    /// Does nothing when the pool already has units.
    pub fn provision_from_capabilities(&self) -> Result<Vec<UnitId>> {
        let caps = self.detector.last_capabilities();
        let cap = self.unit_cap();
        let efficiency = if caps.energy.battery_powered { 0.9 } else { 0.7 };

        let mut state = crate::lock(&self.state);
        if !state.units.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        if caps.processing.cores > 0 {
            let performance =
                (caps.processing.frequency_mhz as f64 / REFERENCE_FREQUENCY_MHZ).clamp(0.1, 1.0);
            ids.push(state.insert_unit(
                ResourceType::Cpu,
                caps.processing.cores as f64 * CPU_CAPACITY_PER_CORE,
                performance,
                efficiency,
            ));
        }
        if caps.memory.total_bytes > 0 {
            ids.push(state.insert_unit(
                ResourceType::Memory,
                caps.memory.total_bytes as f64 / BYTES_PER_GIB,
                0.7,
                efficiency,
            ));
        }
        if state.active && !ids.is_empty() {
            state.allocate(cap);
        }
        info!(units = ids.len(), "Provisioned resource units from capabilities");
        Ok(ids)
    }

    /// Queue a task; placed immediately when the balancer is active
    pub fn create_task(
        &self,
        task_type: TaskType,
        priority: TaskPriority,
        resource_demand: f64,
        expected_duration_ms: u64,
        payload: serde_json::Value,
    ) -> Result<TaskId> {
        if !resource_demand.is_finite() || resource_demand < 0.0 {
            return Err(SchedulerError::invalid(format!(
                "resource demand must be a non-negative number, got {}",
                resource_demand
            )));
        }

        let cap = self.unit_cap();
        let mut state = crate::lock(&self.state);
        let id = state.next_task_id;
        let task = Task::new(
            id,
            task_type,
            priority,
            resource_demand,
            expected_duration_ms,
            payload,
        );
        if let Err(e) = state.pending.push(task) {
            state.stats.tasks_rejected += 1;
            warn!(error = %e, task_type = ?task_type, "Task rejected");
            return Err(e);
        }
        state.next_task_id += 1;
        state.stats.tasks_created += 1;
        debug!(task_id = id, task_type = ?task_type, priority = ?priority, "Task created");

        if state.active {
            state.allocate(cap);
        }
        Ok(id)
    }

    /// Register a callback for a task; runs at once if the task already
    /// finished
    pub fn register_completion_callback<F>(&self, id: TaskId, callback: F) -> Result<()>
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        let mut state = crate::lock(&self.state);
        if state.pending.get(id).is_some() || state.running.get(id).is_some() {
            state.callbacks.insert(id, Box::new(callback));
            return Ok(());
        }
        let task = state
            .completed
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::not_found("task", id))?;
        drop(state);
        callback(&task);
        Ok(())
    }

    /// Signal that a running task finished
    pub fn complete_task(&self, id: TaskId, success: bool) -> Result<()> {
        let cap = self.unit_cap();
        let (task, resource, callback) = {
            let mut state = crate::lock(&self.state);
            let Some(mut task) = state.running.remove(id) else {
                return Err(match state.find_task(id) {
                    Some(t) => SchedulerError::invalid(format!(
                        "task {} is {}, not running",
                        id, t.status
                    )),
                    None => SchedulerError::not_found("task", id),
                });
            };
            let resource = state.release(&task);
            task.advance(if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            });
            state.stats.record_finished(&task);
            state.outcomes.push(success);
            let callback = state.callbacks.remove(&id);
            state.retire(task.clone());

            if state.active {
                state.allocate(cap);
            }
            (task, resource, callback)
        };

        info!(
            task_id = id,
            status = %task.status,
            duration_ms = task.actual_duration_ms.unwrap_or(0),
            "Task finished"
        );
        if let Some(resource) = resource {
            self.monitor.record_operation(resource, 1);
        }
        if let Some(callback) = callback {
            callback(&task);
        }
        self.notify_finished(&task);
        Ok(())
    }

    /// Cancel a pending task, or a running one when preemption is enabled
    pub fn cancel_task(&self, id: TaskId) -> Result<()> {
        let cap = self.unit_cap();
        let (task, callback) = {
            let mut state = crate::lock(&self.state);
            let mut task = if let Some(task) = state.pending.remove(id) {
                task
            } else if state.running.get(id).is_some() {
                if !state.config.enable_preemption {
                    return Err(SchedulerError::invalid(format!(
                        "task {} is running and preemption is disabled",
                        id
                    )));
                }
                let task = state
                    .running
                    .remove(id)
                    .ok_or_else(|| SchedulerError::not_found("task", id))?;
                state.release(&task);
                task
            } else if let Some(done) = state.completed.get(id) {
                return Err(SchedulerError::invalid(format!(
                    "task {} already {}",
                    id, done.status
                )));
            } else {
                return Err(SchedulerError::not_found("task", id));
            };

            task.advance(TaskStatus::Cancelled);
            state.stats.tasks_cancelled += 1;
            let callback = state.callbacks.remove(&id);
            state.retire(task.clone());

            if state.active {
                state.allocate(cap);
            }
            (task, callback)
        };

        info!(task_id = id, "Task cancelled");
        if let Some(callback) = callback {
            callback(&task);
        }
        self.notify_finished(&task);
        Ok(())
    }

    pub fn task_status(&self, id: TaskId) -> Result<Task> {
        crate::lock(&self.state)
            .find_task(id)
            .cloned()
            .ok_or_else(|| SchedulerError::not_found("task", id))
    }

    pub fn pending_tasks(&self) -> Vec<Task> {
        crate::lock(&self.state).pending.iter().cloned().collect()
    }

    pub fn running_tasks(&self) -> Vec<Task> {
        crate::lock(&self.state).running.iter().cloned().collect()
    }

    /// Re-sort pending tasks and place as many as fit, active or not
    ///
    /// Returns the number of tasks started.
    pub fn force_rebalance(&self) -> usize {
        let started = Instant::now();
        let cap = self.unit_cap();
        let (placed, running, failure_ratio, pending) = {
            let mut state = crate::lock(&self.state);
            let placed = state.allocate(cap);
            state.stats.rebalances += 1;
            state.last_rebalance = Some(Instant::now());
            (
                placed,
                state.running.len(),
                state.outcomes.failure_ratio(),
                state.pending.len(),
            )
        };

        debug!(
            started = placed.len(),
            running,
            pending,
            unit_cap = cap.unwrap_or(0),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Rebalance complete"
        );

        if let Err(e) = self
            .adjuster
            .report_usage(running.min(u32::MAX as usize) as u32, failure_ratio)
        {
            warn!(error = %e, "Failed to report usage to capacity adjuster");
        }
        placed.len()
    }

    /// Driver hook: rebalance when active and the interval has elapsed
    pub fn tick(&self) -> Option<usize> {
        let due = {
            let state = crate::lock(&self.state);
            state.active
                && state
                    .last_rebalance
                    .map(|last| last.elapsed() >= state.config.rebalance_interval())
                    .unwrap_or(true)
        };
        due.then(|| self.force_rebalance())
    }

    pub fn stats(&self) -> BalancerStats {
        let state = crate::lock(&self.state);
        let mut stats = state.stats.clone();
        stats.pending_tasks = state.pending.len();
        stats.running_tasks = state.running.len();
        stats.completed_tasks = state.completed.len();
        stats.resource_units = state.units.len();
        stats.active_units = state.units.values().filter(|u| u.active).count();
        stats
    }

    fn notify_finished(&self, task: &Task) {
        let listener = crate::read(&self.listener).clone();
        if let Some(listener) = listener {
            listener(task);
        }
    }

    /// Running-task limit imposed by the adjuster, if it has allocated
    fn unit_cap(&self) -> Option<usize> {
        match self.adjuster.current_units() {
            0 => None,
            units => Some(units as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjuster::AllocationConfig;
    use crate::detector::StaticProvider;
    use crate::events::NullSink;
    use crate::models::{Capabilities, MemoryInfo, ProcessingInfo, UnitHardwareInfo};
    use crate::monitor::ManualUsage;

    struct Fixture {
        monitor: Arc<ResourceMonitor>,
        adjuster: Arc<CapacityAdjuster>,
        balancer: TaskBalancer,
    }

    fn fixture_with(config: BalancerConfig, allocation: AllocationConfig) -> Fixture {
        let provider = Arc::new(StaticProvider::new(Capabilities {
            processing: ProcessingInfo {
                cores: 8,
                frequency_mhz: 3000,
            },
            memory: MemoryInfo {
                total_bytes: 16 * 1024 * 1024 * 1024,
                available_bytes: 8 * 1024 * 1024 * 1024,
            },
            unit_hardware: UnitHardwareInfo {
                max_units: 32,
                ..Default::default()
            },
            ..Default::default()
        }));
        let detector = Arc::new(CapabilityDetector::new(provider));
        let adjuster = Arc::new(CapacityAdjuster::new(detector.clone(), allocation).unwrap());
        let monitor = Arc::new(ResourceMonitor::new(
            Arc::new(ManualUsage::new()),
            Arc::new(NullSink),
        ));
        let balancer =
            TaskBalancer::with_config(monitor.clone(), detector, adjuster.clone(), config).unwrap();
        Fixture {
            monitor,
            adjuster,
            balancer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(BalancerConfig::default(), AllocationConfig::default())
    }

    fn create(balancer: &TaskBalancer, priority: TaskPriority, demand: f64) -> TaskId {
        balancer
            .create_task(
                TaskType::Computation,
                priority,
                demand,
                500,
                serde_json::Value::Null,
            )
            .unwrap()
    }

    #[test]
    fn test_task_placed_on_rebalance() {
        let f = fixture();
        let unit = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        let task = create(&f.balancer, TaskPriority::High, 20.0);
        assert_eq!(
            f.balancer.task_status(task).unwrap().status,
            TaskStatus::Pending
        );

        assert_eq!(f.balancer.force_rebalance(), 1);

        let task = f.balancer.task_status(task).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.assigned_unit_id, Some(unit));
        assert!(task.started_at.is_some());
        assert_eq!(
            f.balancer.resource_unit(unit).unwrap().available_capacity,
            80.0
        );
    }

    #[test]
    fn test_ids_start_at_one() {
        let f = fixture();
        assert_eq!(
            f.balancer
                .add_resource_unit(ResourceType::Memory, 10.0, 0.5, 0.5)
                .unwrap(),
            1
        );
        assert_eq!(create(&f.balancer, TaskPriority::Low, 1.0), 1);
        assert_eq!(create(&f.balancer, TaskPriority::Low, 1.0), 2);
    }

    #[test]
    fn test_priority_order_and_fifo_within_priority() {
        let f = fixture();
        f.balancer
            .add_resource_unit(ResourceType::Cpu, 25.0, 0.9, 0.8)
            .unwrap();
        let n1 = create(&f.balancer, TaskPriority::Normal, 10.0);
        let h1 = create(&f.balancer, TaskPriority::High, 10.0);
        let n2 = create(&f.balancer, TaskPriority::Normal, 10.0);
        let h2 = create(&f.balancer, TaskPriority::High, 10.0);

        assert_eq!(f.balancer.force_rebalance(), 2);
        let status = |id| f.balancer.task_status(id).unwrap().status;
        assert_eq!(status(h1), TaskStatus::Running);
        assert_eq!(status(h2), TaskStatus::Running);
        assert_eq!(status(n1), TaskStatus::Pending);
        assert_eq!(status(n2), TaskStatus::Pending);

        f.balancer.complete_task(h1, true).unwrap();
        assert_eq!(f.balancer.force_rebalance(), 1);
        assert_eq!(status(n1), TaskStatus::Running);
        assert_eq!(status(n2), TaskStatus::Pending);

        let pending: Vec<TaskId> = f.balancer.pending_tasks().iter().map(|t| t.id).collect();
        assert_eq!(pending, vec![n2]);
    }

    #[test]
    fn test_oversized_task_does_not_block_smaller_ones() {
        let f = fixture();
        let unit = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        let big = create(&f.balancer, TaskPriority::High, 150.0);
        let small = create(&f.balancer, TaskPriority::Normal, 10.0);
        let later = create(&f.balancer, TaskPriority::Low, 120.0);
        let tail = create(&f.balancer, TaskPriority::Low, 5.0);

        assert_eq!(f.balancer.force_rebalance(), 2);
        let status = |id| f.balancer.task_status(id).unwrap().status;
        assert_eq!(status(small), TaskStatus::Running);
        assert_eq!(status(tail), TaskStatus::Running);
        assert_eq!(status(big), TaskStatus::Pending);
        assert_eq!(status(later), TaskStatus::Pending);
        assert_eq!(
            f.balancer.resource_unit(unit).unwrap().available_capacity,
            85.0
        );

        // Unplaced tasks keep their order
        let pending: Vec<TaskId> = f.balancer.pending_tasks().iter().map(|t| t.id).collect();
        assert_eq!(pending, vec![big, later]);
    }

    #[test]
    fn test_allocation_stops_at_unit_cap() {
        let f = fixture_with(
            BalancerConfig::default(),
            AllocationConfig {
                min_units: 1,
                current_units: 2,
                ..Default::default()
            },
        );
        f.balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        let big = create(&f.balancer, TaskPriority::High, 500.0);
        for _ in 0..4 {
            create(&f.balancer, TaskPriority::Normal, 1.0);
        }

        assert_eq!(f.balancer.force_rebalance(), 2);
        assert_eq!(f.balancer.running_tasks().len(), 2);
        assert_eq!(f.balancer.pending_tasks()[0].id, big);
        assert_eq!(f.balancer.pending_tasks().len(), 3);
    }

    #[test]
    fn test_capacity_is_conserved() {
        let f = fixture();
        let a = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.9)
            .unwrap();
        let b = f
            .balancer
            .add_resource_unit(ResourceType::Memory, 50.0, 0.5, 0.5)
            .unwrap();
        f.balancer.start();

        let mut ids = Vec::new();
        for demand in [30.0, 45.0, 20.0, 25.0, 10.0] {
            ids.push(create(&f.balancer, TaskPriority::Normal, demand));
        }

        let in_use: f64 = f
            .balancer
            .running_tasks()
            .iter()
            .map(|t| t.resource_demand)
            .sum();
        let free: f64 = f
            .balancer
            .resource_units()
            .iter()
            .map(|u| u.available_capacity)
            .sum();
        assert!((in_use + free - 150.0).abs() < 1e-9);

        for (i, id) in ids.iter().enumerate() {
            if f.balancer.task_status(*id).unwrap().status == TaskStatus::Running {
                f.balancer.complete_task(*id, i % 2 == 0).unwrap();
            }
        }
        while let Some(task) = f.balancer.running_tasks().first().cloned() {
            f.balancer.complete_task(task.id, true).unwrap();
        }

        assert_eq!(f.balancer.resource_unit(a).unwrap().available_capacity, 100.0);
        assert_eq!(f.balancer.resource_unit(b).unwrap().available_capacity, 50.0);
        assert_eq!(f.balancer.stats().tasks_processed, 5);
    }

    #[test]
    fn test_queue_full() {
        let f = fixture_with(
            BalancerConfig {
                max_queue_size: 3,
                ..Default::default()
            },
            AllocationConfig::default(),
        );
        for _ in 0..3 {
            create(&f.balancer, TaskPriority::Normal, 1.0);
        }
        let err = f
            .balancer
            .create_task(
                TaskType::Io,
                TaskPriority::Critical,
                1.0,
                0,
                serde_json::Value::Null,
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { queue: "pending", .. }));
        assert!(err.is_recoverable());

        let stats = f.balancer.stats();
        assert_eq!(stats.pending_tasks, 3);
        assert_eq!(stats.tasks_created, 3);
        assert_eq!(stats.tasks_rejected, 1);
    }

    #[test]
    fn test_cancel_pending_and_running() {
        let f = fixture();
        let unit = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        let waiting = create(&f.balancer, TaskPriority::Low, 200.0);
        f.balancer.cancel_task(waiting).unwrap();
        assert_eq!(
            f.balancer.task_status(waiting).unwrap().status,
            TaskStatus::Cancelled
        );

        let running = create(&f.balancer, TaskPriority::High, 40.0);
        f.balancer.force_rebalance();
        assert!(matches!(
            f.balancer.cancel_task(running),
            Err(SchedulerError::InvalidArgument(_))
        ));
        assert_eq!(
            f.balancer.task_status(running).unwrap().status,
            TaskStatus::Running
        );

        f.balancer
            .set_config(BalancerConfig {
                enable_preemption: true,
                ..Default::default()
            })
            .unwrap();
        f.balancer.cancel_task(running).unwrap();
        assert_eq!(
            f.balancer.task_status(running).unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(
            f.balancer.resource_unit(unit).unwrap().available_capacity,
            100.0
        );

        // Terminal tasks cannot be cancelled again
        assert!(f.balancer.cancel_task(running).is_err());
        assert!(matches!(
            f.balancer.cancel_task(999),
            Err(SchedulerError::NotFound { .. })
        ));
        assert_eq!(f.balancer.stats().tasks_cancelled, 2);
    }

    #[test]
    fn test_completion_callback_and_stats() {
        let f = fixture();
        f.balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        f.balancer.start();

        let ok = create(&f.balancer, TaskPriority::Normal, 10.0);
        let bad = create(&f.balancer, TaskPriority::Normal, 10.0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.balancer
            .register_completion_callback(ok, move |t| sink.lock().unwrap().push((t.id, t.status)))
            .unwrap();

        f.balancer.complete_task(ok, true).unwrap();
        f.balancer.complete_task(bad, false).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(ok, TaskStatus::Completed)]);

        let finished = f.balancer.task_status(ok).unwrap();
        assert!(finished.actual_duration_ms.is_some());
        assert!(finished.finished_at.is_some());

        let stats = f.balancer.stats();
        assert_eq!(stats.tasks_processed, 2);
        assert_eq!(stats.tasks_succeeded, 1);
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.load_distribution.get(&TaskType::Computation), Some(&2));
        assert!(stats.avg_processing_time_ms >= 0.0);

        let record = f.monitor.usage_record(ResourceType::Cpu).unwrap();
        assert_eq!(record.operations_total, 2);

        // Completing twice is rejected
        assert!(matches!(
            f.balancer.complete_task(ok, true),
            Err(SchedulerError::InvalidArgument(_))
        ));

        // Late registration runs immediately
        let late = Arc::new(Mutex::new(None));
        let slot = late.clone();
        f.balancer
            .register_completion_callback(bad, move |t| *slot.lock().unwrap() = Some(t.status))
            .unwrap();
        assert_eq!(*late.lock().unwrap(), Some(TaskStatus::Failed));
    }

    #[test]
    fn test_task_finished_listener_sees_every_outcome() {
        let f = fixture();
        f.balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        f.balancer.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        f.balancer
            .on_task_finished(move |t| sink.lock().unwrap().push((t.id, t.status)));

        let ok = create(&f.balancer, TaskPriority::Normal, 10.0);
        let bad = create(&f.balancer, TaskPriority::Normal, 10.0);
        let dropped = create(&f.balancer, TaskPriority::Normal, 10.0);
        f.balancer.complete_task(ok, true).unwrap();
        f.balancer.complete_task(bad, false).unwrap();
        f.balancer.cancel_task(dropped).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ok, TaskStatus::Completed),
                (bad, TaskStatus::Failed),
                (dropped, TaskStatus::Cancelled),
            ]
        );
    }

    #[test]
    fn test_task_finished_listener_may_reenter_balancer() {
        let f = Arc::new(fixture());
        f.balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        f.balancer.start();

        let pending_seen = Arc::new(Mutex::new(None));
        let slot = pending_seen.clone();
        let inner = f.clone();
        f.balancer.on_task_finished(move |_| {
            *slot.lock().unwrap() = Some(inner.balancer.stats().tasks_processed);
        });

        let task = create(&f.balancer, TaskPriority::Normal, 10.0);
        f.balancer.complete_task(task, true).unwrap();
        assert_eq!(*pending_seen.lock().unwrap(), Some(1));
    }

    #[test]
    fn test_best_unit_wins_ties_to_lowest_id() {
        let f = fixture();
        let low = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.6, 0.6)
            .unwrap();
        let high = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.9)
            .unwrap();
        let twin = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.9)
            .unwrap();

        let t = create(&f.balancer, TaskPriority::Normal, 10.0);
        f.balancer.force_rebalance();
        assert_eq!(f.balancer.task_status(t).unwrap().assigned_unit_id, Some(high));
        assert!(high < twin && low < high);

        // Best unit cannot host a large demand
        f.balancer.update_resource_unit(high, 5.0, 0.9, 0.9).unwrap();
        f.balancer.update_resource_unit(twin, 5.0, 0.9, 0.9).unwrap();
        let big = create(&f.balancer, TaskPriority::Normal, 50.0);
        f.balancer.force_rebalance();
        assert_eq!(f.balancer.task_status(big).unwrap().assigned_unit_id, Some(low));
    }

    #[test]
    fn test_adjuster_allocation_caps_running_tasks() {
        let f = fixture_with(
            BalancerConfig::default(),
            AllocationConfig {
                min_units: 1,
                current_units: 2,
                ..Default::default()
            },
        );
        f.balancer
            .add_resource_unit(ResourceType::Cpu, 1000.0, 0.9, 0.8)
            .unwrap();
        for _ in 0..3 {
            create(&f.balancer, TaskPriority::Normal, 1.0);
        }
        assert_eq!(f.balancer.force_rebalance(), 2);
        assert_eq!(f.balancer.stats().running_tasks, 2);
        assert_eq!(f.balancer.stats().pending_tasks, 1);
    }

    #[test]
    fn test_rebalance_reports_usage_to_adjuster() {
        let f = fixture();
        f.balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        create(&f.balancer, TaskPriority::Normal, 10.0);
        create(&f.balancer, TaskPriority::Normal, 10.0);
        f.balancer.force_rebalance();

        let stats = f.adjuster.stats();
        assert_eq!(stats.active_units, 2);
        assert_eq!(stats.samples_since_adjustment, 1);
    }

    #[test]
    fn test_remove_unit_refused_while_busy() {
        let f = fixture();
        let unit = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        let task = create(&f.balancer, TaskPriority::Normal, 10.0);
        f.balancer.force_rebalance();

        assert!(matches!(
            f.balancer.remove_resource_unit(unit),
            Err(SchedulerError::InvalidArgument(_))
        ));
        f.balancer.complete_task(task, true).unwrap();
        assert_eq!(f.balancer.remove_resource_unit(unit).unwrap().id, unit);
        assert!(matches!(
            f.balancer.remove_resource_unit(unit),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[test]
    fn test_release_after_overwrite_stays_within_total() {
        let f = fixture();
        let unit = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        f.balancer.start();
        let task = create(&f.balancer, TaskPriority::Normal, 40.0);
        assert_eq!(
            f.balancer.resource_unit(unit).unwrap().available_capacity,
            60.0
        );

        f.balancer
            .update_resource_unit(unit, 100.0, 0.9, 0.8)
            .unwrap();
        f.balancer.complete_task(task, true).unwrap();

        let unit = f.balancer.resource_unit(unit).unwrap();
        assert_eq!(unit.available_capacity, unit.total_capacity);
    }

    #[test]
    fn test_unit_validation() {
        let f = fixture();
        assert!(f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 0.0, 0.5, 0.5)
            .is_err());
        assert!(f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 10.0, 1.5, 0.5)
            .is_err());
        let unit = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 10.0, 0.5, 0.5)
            .unwrap();
        assert!(f.balancer.update_resource_unit(unit, 11.0, 0.5, 0.5).is_err());
        assert!(f.balancer.update_resource_unit(42, 1.0, 0.5, 0.5).is_err());
        assert!(f
            .balancer
            .create_task(
                TaskType::Memory,
                TaskPriority::Low,
                -1.0,
                0,
                serde_json::Value::Null
            )
            .is_err());
    }

    #[test]
    fn test_inactive_unit_is_skipped() {
        let f = fixture();
        let unit = f
            .balancer
            .add_resource_unit(ResourceType::Cpu, 100.0, 0.9, 0.8)
            .unwrap();
        f.balancer.set_unit_active(unit, false).unwrap();
        create(&f.balancer, TaskPriority::Normal, 1.0);
        assert_eq!(f.balancer.force_rebalance(), 0);
        assert_eq!(f.balancer.stats().active_units, 0);
    }

    #[test]
    fn test_provision_from_capabilities() {
        let f = fixture();
        let ids = f.balancer.provision_from_capabilities().unwrap();
        assert_eq!(ids.len(), 2);

        let units = f.balancer.resource_units();
        let cpu = units
            .iter()
            .find(|u| u.resource_type == ResourceType::Cpu)
            .unwrap();
        assert_eq!(cpu.total_capacity, 800.0);
        assert!((cpu.performance_rating - 0.75).abs() < 1e-12);
        let memory = units
            .iter()
            .find(|u| u.resource_type == ResourceType::Memory)
            .unwrap();
        assert_eq!(memory.total_capacity, 16.0);

        // A populated pool is left alone
        assert!(f.balancer.provision_from_capabilities().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_provisioning_seeds_once() {
        let f = fixture();
        let results: Vec<Vec<UnitId>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| f.balancer.provision_from_capabilities().unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|ids| !ids.is_empty()).count(), 1);
        assert_eq!(f.balancer.resource_units().len(), 2);
    }

    #[test]
    fn test_tick_respects_interval() {
        let f = fixture();
        assert_eq!(f.balancer.tick(), None);

        f.balancer.start();
        // start() just rebalanced; the default interval is five seconds
        assert_eq!(f.balancer.tick(), None);

        f.balancer
            .set_config(BalancerConfig {
                rebalance_interval_ms: 0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(f.balancer.tick(), Some(0));
        assert_eq!(f.balancer.stats().rebalances, 2);
    }

    #[test]
    fn test_completed_queue_evicts_oldest() {
        let f = fixture_with(
            BalancerConfig {
                max_queue_size: 2,
                ..Default::default()
            },
            AllocationConfig::default(),
        );
        let first = create(&f.balancer, TaskPriority::Low, 1.0);
        f.balancer.cancel_task(first).unwrap();
        for _ in 0..2 {
            let id = create(&f.balancer, TaskPriority::Low, 1.0);
            f.balancer.cancel_task(id).unwrap();
        }
        assert_eq!(f.balancer.stats().completed_tasks, 2);
        assert!(matches!(
            f.balancer.task_status(first),
            Err(SchedulerError::NotFound { .. })
        ));
    }
}
