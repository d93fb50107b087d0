use serde_json::json;

use crate::tasks::command::TaskCommand;
use crate::tasks::error::TaskError;
use crate::tasks::monitor::{EventType, TaskMonitor};
use crate::tasks::registry::TaskRegistry;

/// Outcome of running a command in-process.
#[derive(Debug)]
pub struct TaskRun {
    pub attempts: u32,
    pub result: Result<(), TaskError>,
    /// The command as of the last attempt.
    pub command: TaskCommand,
}

/// Run a command in the current task, turning queued retries into immediate
/// retries. Terminal failures are returned, not reported.
pub async fn run_inline(registry: &TaskRegistry, monitor: &dyn TaskMonitor, command: TaskCommand) -> TaskRun {
    let mut command = command;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match registry.execute(&command).await {
            Ok(()) => {
                return TaskRun {
                    attempts,
                    result: Ok(()),
                    command,
                }
            }
            Err(error) => match command.retry_after(&error) {
                Some(next) => {
                    tracing::warn!(
                        "Retrying task {} in-process (attempt {}): {}",
                        command.task,
                        next.attempt,
                        error
                    );
                    monitor.emit(
                        EventType::TaskRetry,
                        json!({
                            "task": command.task,
                            "job_id": command.job_id,
                            "attempt": next.attempt,
                            "error": error.to_string(),
                        }),
                    );
                    command = next;
                }
                None => {
                    return TaskRun {
                        attempts,
                        result: Err(error),
                        command,
                    }
                }
            },
        }
    }
}
