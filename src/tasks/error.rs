use thiserror::Error;

/// Failure of a deferred task body.
///
/// `kind` names the failure class and is what retry filters match on.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task exceeded its time limit of {0}s")]
    TimedOut(u64),

    #[error("Invalid task arguments: {0}")]
    InvalidArguments(String),
}

impl TaskError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TaskError::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            TaskError::Failed { kind, .. } => kind,
            TaskError::UnknownTask(_) => "UnknownTask",
            TaskError::TimedOut(_) => "TimeLimitExceeded",
            TaskError::InvalidArguments(_) => "InvalidArguments",
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::InvalidArguments(err.to_string())
    }
}

/// The queue refused a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),

    #[error("Task queue is closed")]
    Closed,
}
