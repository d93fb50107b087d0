use std::sync::Mutex;

use serde_json::Value;

use crate::tasks::command::TaskCommand;
use crate::tasks::error::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    QueueLength,
    TaskRetry,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::QueueLength => "task_runner:queue_length",
            EventType::TaskRetry => "task_runner:retry",
        }
    }
}

/// Observability sink for deferred task execution.
pub trait TaskMonitor: Send + Sync {
    /// A task failed for the last time.
    fn report_failure(&self, command: &TaskCommand, error: &TaskError);

    fn emit(&self, event: EventType, payload: Value) {
        tracing::debug!("Task event {}: {}", event.as_str(), payload);
    }
}

/// Logs terminal failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl TaskMonitor for TracingMonitor {
    fn report_failure(&self, command: &TaskCommand, error: &TaskError) {
        tracing::error!(
            "Deferred task {} failed after {} attempt(s): job_id={}, correlation_id={:?}, error={}",
            command.task,
            command.attempt,
            command.job_id,
            command.correlation_id,
            error
        );
    }
}

/// Keeps every failure and event in memory.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    failures: Mutex<Vec<(String, TaskError)>>,
    events: Mutex<Vec<(EventType, Value)>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<(String, TaskError)> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events(&self, event: EventType) -> Vec<Value> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(kind, _)| *kind == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl TaskMonitor for RecordingMonitor {
    fn report_failure(&self, command: &TaskCommand, error: &TaskError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((command.task.clone(), error.clone()));
    }

    fn emit(&self, event: EventType, payload: Value) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((event, payload));
    }
}
