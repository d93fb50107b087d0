use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ResourceError {
    #[error("Field '{field}' is not writable on {type_name}")]
    ReadOnlyField { type_name: &'static str, field: String },

    #[error("Invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Resource is shared and cannot be mutated in place")]
    Shared,

    #[error("Resource has no identity")]
    MissingId,

    #[error("Unexpected resource type: expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("Store error: {0}")]
    Store(String),
}
