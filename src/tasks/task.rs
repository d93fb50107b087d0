use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::endpoint::bound::BoundEndpoint;
use crate::endpoint::error::EndpointError;
use crate::tasks::error::TaskError;
use crate::tasks::retry::RetryPolicy;

pub type ImmediateFn = Arc<
    dyn for<'a> Fn(&'a mut BoundEndpoint) -> BoxFuture<'a, Result<(), EndpointError>> + Send + Sync,
>;
pub type TaskFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;
pub type ArgsFn = Arc<dyn Fn(&BoundEndpoint) -> Value + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&BoundEndpoint) -> bool + Send + Sync>;

/// A named unit of work declared on an endpoint.
#[derive(Clone)]
pub struct Task {
    pub name: String,
    /// Lower runs first.
    pub priority: i32,
    pub depends_on: Option<String>,
    pub mode: TaskMode,
}

#[derive(Clone)]
pub enum TaskMode {
    /// Runs inside the request and may mutate the resource.
    Immediate(ImmediateFn),
    /// Runs after the resource is finalized, usually on the queue.
    Deferred(DeferredTask),
}

impl Task {
    pub fn immediate<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut BoundEndpoint) -> BoxFuture<'a, Result<(), EndpointError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            priority: 0,
            depends_on: None,
            mode: TaskMode::Immediate(Arc::new(f)),
        }
    }

    pub fn deferred(name: impl Into<String>, task: DeferredTask) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            depends_on: None,
            mode: TaskMode::Deferred(task),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, task: impl Into<String>) -> Self {
        self.depends_on = Some(task.into());
        self
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.mode, TaskMode::Deferred(_))
    }

    pub fn as_deferred(&self) -> Option<&DeferredTask> {
        match &self.mode {
            TaskMode::Deferred(task) => Some(task),
            TaskMode::Immediate(_) => None,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("deferred", &self.is_deferred())
            .finish()
    }
}

/// A deferred task body plus its dispatch options.
///
/// The body only sees the JSON arguments captured from the bound endpoint,
/// never the endpoint itself, so it can run on a worker after the request
/// has returned.
#[derive(Clone)]
pub struct DeferredTask {
    pub(crate) runner: TaskFn,
    pub(crate) args: Option<ArgsFn>,
    pub(crate) execute_unless: Option<PredicateFn>,
    pub delay: Duration,
    pub always_defer: bool,
    pub force_immediate: bool,
    pub queue: Option<String>,
    pub routing_key: Option<String>,
    pub retry: RetryPolicy,
}

impl DeferredTask {
    pub fn new<F, Fut>(runner: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            runner: Arc::new(move |args| Box::pin(runner(args))),
            args: None,
            execute_unless: None,
            delay: Duration::ZERO,
            always_defer: true,
            force_immediate: false,
            queue: None,
            routing_key: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Capture the arguments handed to the body.
    pub fn args<F>(mut self, f: F) -> Self
    where
        F: Fn(&BoundEndpoint) -> Value + Send + Sync + 'static,
    {
        self.args = Some(Arc::new(f));
        self
    }

    /// Skip the task entirely when the predicate holds.
    pub fn execute_unless<F>(mut self, f: F) -> Self
    where
        F: Fn(&BoundEndpoint) -> bool + Send + Sync + 'static,
    {
        self.execute_unless = Some(Arc::new(f));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn always_defer(mut self, always: bool) -> Self {
        self.always_defer = always;
        self
    }

    pub fn force_immediate(mut self) -> Self {
        self.force_immediate = true;
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    pub fn retry_on(mut self, kind: impl Into<String>) -> Self {
        self.retry = self.retry.on(kind);
        self
    }

    /// Run in-process within the request instead of going to the queue.
    pub fn runs_inline(&self) -> bool {
        self.force_immediate || (self.delay.is_zero() && !self.always_defer)
    }

    pub fn should_skip(&self, bound: &BoundEndpoint) -> bool {
        self.execute_unless.as_ref().is_some_and(|p| p(bound))
    }

    /// Arguments for the body; by default the resource id and resolved values.
    pub fn capture_args(&self, bound: &BoundEndpoint) -> Value {
        match &self.args {
            Some(f) => f(bound),
            None => json!({
                "resource_id": bound.cached_resource().and_then(|r| r.as_object()).and_then(|o| o.id()),
                "values": bound.values_json(),
            }),
        }
    }

    pub fn runner(&self) -> TaskFn {
        self.runner.clone()
    }
}
