//! Monitoring events and the sinks that consume them
//!
//! The monitor never logs or persists on its own. It hands every event to an
//! [`EventSink`]; callers decide whether that means a broadcast channel,
//! structured log lines, an in-memory ring for an API, or all of them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::{ResourceType, Severity};

/// Default capacity of the broadcast channel behind [`EventBus`]
const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Kind of monitoring event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MonitoringStarted,
    MonitoringStopped,
    UsageChanged,
    ThresholdExceeded,
    PerformanceMeasured,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::MonitoringStarted => write!(f, "MonitoringStarted"),
            EventType::MonitoringStopped => write!(f, "MonitoringStopped"),
            EventType::UsageChanged => write!(f, "UsageChanged"),
            EventType::ThresholdExceeded => write!(f, "ThresholdExceeded"),
            EventType::PerformanceMeasured => write!(f, "PerformanceMeasured"),
        }
    }
}

/// A single event emitted by the resource monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub event_type: EventType,
    /// Resource the event refers to; `None` for lifecycle events
    pub resource_type: Option<ResourceType>,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl MonitorEvent {
    pub fn new(
        event_type: EventType,
        resource_type: Option<ResourceType>,
        value: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            resource_type,
            value,
            severity: None,
            timestamp: Utc::now(),
            description: description.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Consumer of monitoring events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &MonitorEvent);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &MonitorEvent) {}
}

/// Broadcast bus; every subscriber receives every event emitted after it
/// subscribed
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &MonitorEvent) {
        // No subscribers is not an error
        let _ = self.tx.send(event.clone());
    }
}

/// Writes events as structured log records
#[derive(Debug, Clone)]
pub struct LogSink {
    instance: String,
}

impl LogSink {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }
}

impl EventSink for LogSink {
    fn emit(&self, event: &MonitorEvent) {
        let resource = event
            .resource_type
            .map(|r| r.to_string())
            .unwrap_or_default();

        match event.event_type {
            EventType::ThresholdExceeded => {
                let severity = event.severity.unwrap_or(Severity::Warning);
                if severity == Severity::Critical {
                    warn!(
                        event = "threshold_exceeded",
                        instance = %self.instance,
                        resource = %resource,
                        value = event.value,
                        severity = %severity,
                        "{}", event.description
                    );
                } else {
                    info!(
                        event = "threshold_exceeded",
                        instance = %self.instance,
                        resource = %resource,
                        value = event.value,
                        severity = %severity,
                        "{}", event.description
                    );
                }
            }
            EventType::MonitoringStarted | EventType::MonitoringStopped => {
                info!(
                    event = %event.event_type,
                    instance = %self.instance,
                    "{}", event.description
                );
            }
            _ => {
                debug!(
                    event = %event.event_type,
                    instance = %self.instance,
                    resource = %resource,
                    value = event.value,
                    "{}", event.description
                );
            }
        }
    }
}

/// Bounded in-memory history of the most recent events
#[derive(Debug)]
pub struct RecentEvents {
    capacity: usize,
    events: Mutex<VecDeque<MonitorEvent>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Most recent events, oldest first
    pub fn list(&self) -> Vec<MonitorEvent> {
        crate::lock(&self.events).iter().cloned().collect()
    }

    /// Events of one type, oldest first
    pub fn of_type(&self, event_type: EventType) -> Vec<MonitorEvent> {
        crate::lock(&self.events)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        crate::lock(&self.events).clear();
    }
}

impl EventSink for RecentEvents {
    fn emit(&self, event: &MonitorEvent) {
        let mut events = crate::lock(&self.events);
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Forwards every event to each inner sink in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &MonitorEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
