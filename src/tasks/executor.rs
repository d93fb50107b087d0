use std::sync::Arc;

use crate::config::TaskConfig;
use crate::endpoint::bound::BoundEndpoint;
use crate::endpoint::error::EndpointError;
use crate::tasks::command::TaskCommand;
use crate::tasks::error::QueueError;
use crate::tasks::monitor::{TaskMonitor, TracingMonitor};
use crate::tasks::queue::{DisabledQueue, TaskQueue};
use crate::tasks::registry::{qualified_task_name, TaskRegistry};
use crate::tasks::runner::run_inline;
use crate::tasks::task::{DeferredTask, Task, TaskMode};

/// What happened to each task of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Immediate tasks, in execution order.
    pub executed: Vec<String>,
    /// Deferred tasks handed to the queue.
    pub enqueued: Vec<String>,
    /// Deferred tasks run in-process.
    pub inline: Vec<String>,
    pub skipped: Vec<String>,
    /// Deferred tasks that failed in-process and were reported.
    pub failed: Vec<String>,
}

/// Runs the task graph of a bound endpoint.
///
/// Immediate tasks run first, in schema order. The definition's `finalize`
/// hook runs next, and only then are deferred tasks dispatched, so a worker
/// never sees a half-built resource.
#[derive(Clone)]
pub struct TaskExecutor {
    config: TaskConfig,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<TaskRegistry>,
    monitor: Arc<dyn TaskMonitor>,
}

impl TaskExecutor {
    pub fn new(config: TaskConfig, queue: Arc<dyn TaskQueue>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            config,
            queue,
            registry,
            monitor: Arc::new(TracingMonitor),
        }
    }

    /// An executor with no queue: deferred work runs in-process.
    pub fn synchronous(config: TaskConfig) -> Self {
        let config = TaskConfig {
            force_synchronous: true,
            ..config
        };
        Self::new(config, Arc::new(DisabledQueue), Arc::new(TaskRegistry::new()))
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn TaskMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub async fn run(&self, bound: &mut BoundEndpoint) -> Result<ExecutionReport, EndpointError> {
        let schema = bound.schema().clone();
        let definition = bound.definition().clone();
        let mut report = ExecutionReport::default();

        tracing::debug!(
            "Task order for {}: immediate={:?}, deferred={:?}",
            schema.endpoint(),
            schema.immediate_tasks().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            schema.deferred_tasks().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );

        for task in schema.immediate_tasks() {
            let TaskMode::Immediate(body) = &task.mode else {
                continue;
            };

            if let Err(err) = body(bound).await {
                if err.wants_save() {
                    tracing::debug!("Task {} asked to save changes before failing", task.name);
                    definition.finalize(bound).await?;
                    return Err(err.unwrap_save());
                }
                if err.is_client_error() {
                    tracing::warn!("Task {} rejected the request: {}", task.name, err);
                    return Err(err);
                }
                tracing::error!("Task {} failed: {}", task.name, err);
                return Err(EndpointError::TaskFailed {
                    task: task.name.clone(),
                    message: err.to_string(),
                });
            }
            report.executed.push(task.name.clone());
        }

        definition.finalize(bound).await?;

        for task in schema.deferred_tasks() {
            if let Some(deferred) = task.as_deferred() {
                self.dispatch(bound, task, deferred, &mut report).await?;
            }
        }

        Ok(report)
    }

    async fn dispatch(
        &self,
        bound: &BoundEndpoint,
        task: &Task,
        deferred: &DeferredTask,
        report: &mut ExecutionReport,
    ) -> Result<(), EndpointError> {
        if deferred.should_skip(bound) {
            tracing::debug!("Skipping deferred task {}: execute_unless matched", task.name);
            report.skipped.push(task.name.clone());
            return Ok(());
        }

        let name = qualified_task_name(bound.endpoint_name(), &task.name);
        if !self.registry.contains(&name) {
            self.registry.register(name.clone(), deferred.runner());
        }

        let command = TaskCommand::new(name, deferred.capture_args(bound), deferred, &self.config)
            .with_correlation_id(bound.request().correlation_id().map(str::to_string));

        if self.config.force_synchronous {
            self.run_reported(task, command, report).await;
            return Ok(());
        }

        if deferred.runs_inline() {
            let run = run_inline(&self.registry, self.monitor.as_ref(), command).await;
            return match run.result {
                Ok(()) => {
                    report.inline.push(task.name.clone());
                    Ok(())
                }
                Err(err) => {
                    tracing::error!("Inline task {} failed: {}", task.name, err);
                    Err(EndpointError::TaskFailed {
                        task: task.name.clone(),
                        message: err.to_string(),
                    })
                }
            };
        }

        match self.enqueue(command.clone()).await {
            Ok(()) => {
                report.enqueued.push(task.name.clone());
                Ok(())
            }
            Err(err) if self.config.synchronous_fallback => {
                tracing::warn!("Falling back to in-process execution of {}: {}", task.name, err);
                self.run_reported(task, command, report).await;
                Ok(())
            }
            Err(err) => {
                tracing::error!("Could not enqueue task {}: {}", task.name, err);
                Err(EndpointError::TaskFailed {
                    task: task.name.clone(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Run in-process; a terminal failure goes to the monitor, not the caller.
    async fn run_reported(&self, task: &Task, command: TaskCommand, report: &mut ExecutionReport) {
        let run = run_inline(&self.registry, self.monitor.as_ref(), command).await;
        match &run.result {
            Ok(()) => report.inline.push(task.name.clone()),
            Err(err) => {
                self.monitor.report_failure(&run.command, err);
                report.failed.push(task.name.clone());
            }
        }
    }

    async fn enqueue(&self, command: TaskCommand) -> Result<(), QueueError> {
        let attempts = self.config.enqueue_attempts.max(1);
        let mut last_error = QueueError::Closed;
        for attempt in 1..=attempts {
            match self.queue.enqueue(command.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        "Enqueue of {} failed (attempt {}/{}): {}",
                        command.task,
                        attempt,
                        attempts,
                        err
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}
