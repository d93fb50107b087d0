//! Task graph execution: immediate tasks inside the request, deferred tasks
//! as serializable commands on a queue.

pub mod command;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod task;

pub use command::{RetryParams, TaskCommand};
pub use error::{QueueError, TaskError};
pub use executor::{ExecutionReport, TaskExecutor};
pub use monitor::{EventType, RecordingMonitor, TaskMonitor, TracingMonitor};
pub use queue::{DisabledQueue, InProcessQueue, QueueStats, TaskQueue};
pub use registry::{qualified_task_name, TaskRegistry};
pub use retry::RetryPolicy;
pub use runner::{run_inline, TaskRun};
pub use task::{DeferredTask, Task, TaskMode};
