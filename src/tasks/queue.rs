use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use crate::tasks::command::TaskCommand;
use crate::tasks::error::QueueError;
use crate::tasks::monitor::{EventType, TaskMonitor};
use crate::tasks::registry::TaskRegistry;

/// Hand-off point to background execution. Enqueue never waits for the
/// task to run.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, command: TaskCommand) -> Result<(), QueueError>;
}

/// A queue that rejects everything; used when no worker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledQueue;

#[async_trait]
impl TaskQueue for DisabledQueue {
    async fn enqueue(&self, command: TaskCommand) -> Result<(), QueueError> {
        Err(QueueError::Unavailable(format!(
            "no task queue configured for {}",
            command.task
        )))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

struct QueueState {
    registry: Arc<TaskRegistry>,
    monitor: Arc<dyn TaskMonitor>,
    pending: AtomicUsize,
    idle: Notify,
    counters: Counters,
}

impl QueueState {
    fn job_started(&self, command: &TaskCommand) {
        let length = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        self.monitor.emit(
            EventType::QueueLength,
            json!({
                "queue": command.queue.as_deref().unwrap_or("default"),
                "length": length,
            }),
        );
    }

    fn job_finished(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Background queue backed by tokio tasks in this process.
///
/// Retries are re-enqueued with their countdown as delay; exhausted
/// commands are reported to the monitor.
#[derive(Clone)]
pub struct InProcessQueue {
    sender: mpsc::UnboundedSender<TaskCommand>,
    state: Arc<QueueState>,
}

impl InProcessQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn start(registry: Arc<TaskRegistry>, monitor: Arc<dyn TaskMonitor>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<TaskCommand>();
        let state = Arc::new(QueueState {
            registry,
            monitor,
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            counters: Counters::default(),
        });

        let worker_state = state.clone();
        let retry_sender = sender.clone();
        tokio::spawn(async move {
            while let Some(command) = receiver.recv().await {
                tokio::spawn(run_job(worker_state.clone(), retry_sender.clone(), command));
            }
            tracing::debug!("In-process task queue worker stopped");
        });

        Self { sender, state }
    }

    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.state.counters;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::SeqCst),
            succeeded: c.succeeded.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            retried: c.retried.load(Ordering::SeqCst),
        }
    }

    /// Wait until every enqueued command, retries included, has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, command: TaskCommand) -> Result<(), QueueError> {
        tracing::debug!(
            "Enqueueing task {} (job_id={}, delay={}ms, queue={:?}, routing_key={:?})",
            command.task,
            command.job_id,
            command.delay_ms,
            command.queue,
            command.routing_key
        );
        self.state.job_started(&command);
        if self.sender.send(command).is_err() {
            self.state.job_finished();
            return Err(QueueError::Closed);
        }
        self.state.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn run_job(state: Arc<QueueState>, sender: mpsc::UnboundedSender<TaskCommand>, command: TaskCommand) {
    if command.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(command.delay_ms)).await;
    }

    match state.registry.execute(&command).await {
        Ok(()) => {
            tracing::debug!("Task {} completed (attempt {})", command.task, command.attempt);
            state.counters.succeeded.fetch_add(1, Ordering::SeqCst);
        }
        Err(error) => match command.retry_after(&error) {
            Some(next) => {
                tracing::warn!(
                    "Task {} failed, retrying in {}s (attempt {}): {}",
                    command.task,
                    next.retry.countdown_secs,
                    next.attempt,
                    error
                );
                state.monitor.emit(
                    EventType::TaskRetry,
                    json!({
                        "task": command.task,
                        "job_id": command.job_id,
                        "attempt": next.attempt,
                        "countdown": next.retry.countdown_secs,
                        "error": error.to_string(),
                    }),
                );
                state.counters.retried.fetch_add(1, Ordering::SeqCst);
                state.job_started(&next);
                if sender.send(next).is_err() {
                    state.job_finished();
                    state.counters.failed.fetch_add(1, Ordering::SeqCst);
                    state.monitor.report_failure(&command, &error);
                }
            }
            None => {
                state.counters.failed.fetch_add(1, Ordering::SeqCst);
                state.monitor.report_failure(&command, &error);
            }
        },
    }

    state.job_finished();
}
