use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::endpoint::schema::EndpointSchema;
use crate::tasks::command::TaskCommand;
use crate::tasks::error::TaskError;
use crate::tasks::task::TaskFn;

pub fn qualified_task_name(endpoint: &str, task: &str) -> String {
    format!("{}.{}", endpoint, task)
}

/// Task name to function table. Commands only carry the name, so workers
/// resolve the body here.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskFn>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, runner: TaskFn) {
        let name = name.into();
        tracing::debug!("Registered deferred task '{}'", name);
        self.tasks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, runner);
    }

    /// Register every deferred task declared on a schema.
    pub fn register_schema(&self, schema: &EndpointSchema) {
        for task in schema.tasks() {
            if let Some(deferred) = task.as_deferred() {
                self.register(qualified_task_name(schema.endpoint(), &task.name), deferred.runner());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.tasks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Run one attempt of a command under its time limits.
    pub async fn execute(&self, command: &TaskCommand) -> Result<(), TaskError> {
        let runner = self
            .get(&command.task)
            .ok_or_else(|| TaskError::UnknownTask(command.task.clone()))?;

        let started = Instant::now();
        let result = timeout(
            Duration::from_secs(command.time_limit_secs),
            runner(command.args.clone()),
        )
        .await
        .unwrap_or(Err(TaskError::TimedOut(command.time_limit_secs)));

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(command.soft_time_limit_secs) {
            tracing::warn!(
                "Deferred task {} exceeded soft time limit of {}s ({:?})",
                command.task,
                command.soft_time_limit_secs,
                elapsed
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;
    use crate::tasks::task::DeferredTask;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn unknown_tasks_fail() {
        let registry = TaskRegistry::new();
        let task = DeferredTask::new(|_| async { Ok(()) });
        let cmd = TaskCommand::new("Missing.task", json!({}), &task, &TaskConfig::default());
        assert_eq!(
            registry.execute(&cmd).await,
            Err(TaskError::UnknownTask("Missing.task".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hard_time_limit_is_enforced() {
        let registry = TaskRegistry::new();
        let task = DeferredTask::new(|_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        registry.register("Slow.task", task.runner());

        let config = TaskConfig {
            time_limit_secs: 5,
            soft_time_limit_secs: 1,
            ..TaskConfig::default()
        };
        let cmd = TaskCommand::new("Slow.task", json!({}), &task, &config);
        assert_eq!(registry.execute(&cmd).await, Err(TaskError::TimedOut(5)));
    }

    #[tokio::test]
    async fn passes_arguments_to_the_body() {
        let registry = TaskRegistry::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = seen.clone();
        let task = DeferredTask::new(move |args| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = Some(args);
                Ok(())
            }
        });
        registry.register("Todo.notify", task.runner());

        let cmd = TaskCommand::new("Todo.notify", json!({"resource_id": "7"}), &task, &TaskConfig::default());
        registry.execute(&cmd).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(json!({"resource_id": "7"})));
    }
}
