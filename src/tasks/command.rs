use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::tasks::error::TaskError;
use crate::tasks::retry::{next_countdown, RetryPolicy};
use crate::tasks::task::DeferredTask;

/// Retry state carried with a command between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryParams {
    pub retries_remaining: u32,
    #[serde(default)]
    pub retry_on: Vec<String>,
    pub countdown_secs: u64,
}

/// Serializable request to run a registered task with captured arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCommand {
    pub job_id: Uuid,
    /// Qualified name, `Endpoint.task`.
    pub task: String,
    pub args: Value,
    pub delay_ms: u64,
    pub queue: Option<String>,
    pub routing_key: Option<String>,
    pub retry: RetryParams,
    pub time_limit_secs: u64,
    pub soft_time_limit_secs: u64,
    pub created_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub attempt: u32,
}

impl TaskCommand {
    pub fn new(task: impl Into<String>, args: Value, deferred: &DeferredTask, config: &TaskConfig) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            task: task.into(),
            args,
            delay_ms: deferred.delay.as_millis() as u64,
            queue: deferred.queue.clone(),
            routing_key: deferred.routing_key.clone(),
            retry: RetryParams {
                retries_remaining: deferred.retry.retries,
                retry_on: deferred.retry.retry_on.clone(),
                countdown_secs: 0,
            },
            time_limit_secs: config.time_limit_secs,
            soft_time_limit_secs: config.soft_time_limit_secs,
            created_at: Utc::now(),
            correlation_id: None,
            attempt: 1,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry.retries_remaining,
            retry_on: self.retry.retry_on.clone(),
        }
    }

    /// The follow-up command for a failed attempt, if the policy allows one.
    pub fn retry_after(&self, error: &TaskError) -> Option<Self> {
        if self.retry.retries_remaining == 0 || !self.retry_policy().matches(error) {
            return None;
        }

        let countdown = next_countdown(self.retry.countdown_secs);
        let mut next = self.clone();
        next.retry.retries_remaining -= 1;
        next.retry.countdown_secs = countdown;
        next.delay_ms = countdown * 1000;
        next.attempt += 1;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(retries: u32) -> TaskCommand {
        let task = DeferredTask::new(|_| async { Ok(()) })
            .retries(retries)
            .retry_on("TransientError");
        TaskCommand::new("TodoCreate.notify", json!({"id": 1}), &task, &TaskConfig::default())
    }

    #[test]
    fn retry_decrements_and_doubles_countdown() {
        let transient = TaskError::failed("TransientError", "flaky");
        let first = command(2);

        let second = first.retry_after(&transient).unwrap();
        assert_eq!(second.retry.retries_remaining, 1);
        assert_eq!(second.retry.countdown_secs, 1);
        assert_eq!(second.attempt, 2);
        assert_eq!(second.job_id, first.job_id);

        let third = second.retry_after(&transient).unwrap();
        assert_eq!(third.retry.retries_remaining, 0);
        assert_eq!(third.retry.countdown_secs, 2);
        assert_eq!(third.delay_ms, 2000);

        assert!(third.retry_after(&transient).is_none());
    }

    #[test]
    fn unmatched_failure_is_terminal() {
        assert!(command(5).retry_after(&TaskError::failed("ValueError", "bad")).is_none());
    }

    #[test]
    fn commands_serialize_for_transport() {
        let cmd = command(1);
        let encoded = serde_json::to_value(&cmd).unwrap();
        assert_eq!(encoded["task"], "TodoCreate.notify");
        assert_eq!(encoded["retry"]["retry_on"], json!(["TransientError"]));
    }
}
