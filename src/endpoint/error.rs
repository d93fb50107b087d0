use axum::http::StatusCode;
use thiserror::Error;

use crate::resource::ResourceError;

/// Error codes carried in client-facing error bodies.
pub mod codes {
    pub const FORBIDDEN: u16 = 601;
    pub const REQUEST_THROTTLED: u16 = 605;
    pub const AUTHORIZATION_FAILURE: u16 = 607;
    pub const EXTRA_FIELDS: u16 = 700;
    pub const MISSING_FIELDS: u16 = 702;
    pub const INVALID_FIELD_VALUES: u16 = 703;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const UNPROCESSABLE_ENTITY: u16 = 422;
    pub const SERVER_ERROR: u16 = 500;
}

/// Errors raised while binding and processing an endpoint.
#[derive(Error, Debug, Clone)]
pub enum EndpointError {
    #[error("Missing required field(s): {}", .fields.join(", "))]
    MissingFields {
        fields: Vec<String>,
        detail: Option<String>,
    },

    #[error("Invalid value(s) for field(s): {}", .fields.join(", "))]
    InvalidFieldValues {
        fields: Vec<String>,
        detail: Option<String>,
    },

    #[error("Authorization failure")]
    Unauthenticated {
        detail: Option<String>,
        challenge: Option<String>,
    },

    #[error("Not allowed")]
    Forbidden { detail: Option<String> },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected fields: {}", .0.join(", "))]
    UnexpectedFields(Vec<String>),

    #[error("Too many requests.  Please try again later.")]
    RateLimited { key: String },

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("No endpoint definition matched the request")]
    NoMatch { rejections: Vec<Rejection> },

    #[error("Task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("{endpoint} does not implement {member}")]
    NotImplemented {
        endpoint: &'static str,
        member: &'static str,
    },

    /// Wraps an error raised by a task that wants the resource persisted
    /// before the error propagates.
    #[error("{0}")]
    SaveChanges(Box<EndpointError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a candidate definition was not selected.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub endpoint: &'static str,
    pub error: EndpointError,
}

impl EndpointError {
    pub fn missing(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EndpointError::MissingFields {
            fields: fields.into_iter().map(Into::into).collect(),
            detail: None,
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        EndpointError::Forbidden {
            detail: Some(detail.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EndpointError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        EndpointError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EndpointError::Internal(message.into())
    }

    /// Ask the executor to persist the resource before propagating.
    pub fn save_changes(self) -> Self {
        match self {
            EndpointError::SaveChanges(_) => self,
            other => EndpointError::SaveChanges(Box::new(other)),
        }
    }

    pub fn wants_save(&self) -> bool {
        matches!(self, EndpointError::SaveChanges(_))
    }

    pub fn unwrap_save(self) -> Self {
        match self {
            EndpointError::SaveChanges(inner) => *inner,
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EndpointError::MissingFields { .. }
            | EndpointError::InvalidFieldValues { .. }
            | EndpointError::Validation(_)
            | EndpointError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            EndpointError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            EndpointError::Forbidden { .. } => StatusCode::FORBIDDEN,
            EndpointError::NotFound(_) => StatusCode::NOT_FOUND,
            EndpointError::UnexpectedFields(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EndpointError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EndpointError::NoMatch { rejections } => {
                let mut statuses = rejections.iter().map(|r| r.error.status_code());
                match statuses.next() {
                    Some(first) if statuses.all(|s| s == first) => first,
                    _ => StatusCode::BAD_REQUEST,
                }
            }
            EndpointError::SaveChanges(inner) => inner.status_code(),
            EndpointError::TaskFailed { .. }
            | EndpointError::NotImplemented { .. }
            | EndpointError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> u16 {
        match self {
            EndpointError::MissingFields { .. } => codes::MISSING_FIELDS,
            EndpointError::InvalidFieldValues { .. } | EndpointError::Validation(_) => codes::INVALID_FIELD_VALUES,
            EndpointError::MalformedBody(_) => codes::BAD_REQUEST,
            EndpointError::Unauthenticated { .. } => codes::AUTHORIZATION_FAILURE,
            EndpointError::Forbidden { .. } => codes::FORBIDDEN,
            EndpointError::NotFound(_) => codes::NOT_FOUND,
            EndpointError::UnexpectedFields(_) => codes::UNPROCESSABLE_ENTITY,
            EndpointError::RateLimited { .. } => codes::REQUEST_THROTTLED,
            EndpointError::NoMatch { .. } => codes::BAD_REQUEST,
            EndpointError::SaveChanges(inner) => inner.error_code(),
            EndpointError::TaskFailed { .. }
            | EndpointError::NotImplemented { .. }
            | EndpointError::Internal(_) => codes::SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Extra detail for the error body, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            EndpointError::MissingFields { detail, .. }
            | EndpointError::InvalidFieldValues { detail, .. }
            | EndpointError::Unauthenticated { detail, .. }
            | EndpointError::Forbidden { detail } => detail.as_deref(),
            EndpointError::SaveChanges(inner) => inner.detail(),
            _ => None,
        }
    }
}

impl From<ResourceError> for EndpointError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::InvalidValue { field, message } => EndpointError::InvalidFieldValues {
                fields: vec![field],
                detail: Some(message),
            },
            ResourceError::ReadOnlyField { field, .. } => EndpointError::InvalidFieldValues {
                fields: vec![field],
                detail: Some("field is read-only".to_string()),
            },
            other => EndpointError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_message_lists_fields() {
        let err = EndpointError::missing(["priority", "task"]);
        assert_eq!(err.to_string(), "Missing required field(s): priority, task");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), codes::MISSING_FIELDS);
    }

    #[test]
    fn no_match_status_prefers_bad_request_on_mixed_reasons() {
        let mixed = EndpointError::NoMatch {
            rejections: vec![
                Rejection {
                    endpoint: "A",
                    error: EndpointError::forbidden("nope"),
                },
                Rejection {
                    endpoint: "B",
                    error: EndpointError::missing(["x"]),
                },
            ],
        };
        assert_eq!(mixed.status_code(), StatusCode::BAD_REQUEST);

        let same = EndpointError::NoMatch {
            rejections: vec![
                Rejection {
                    endpoint: "A",
                    error: EndpointError::forbidden("a"),
                },
                Rejection {
                    endpoint: "B",
                    error: EndpointError::forbidden("b"),
                },
            ],
        };
        assert_eq!(same.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn save_changes_wraps_once_and_keeps_status() {
        let err = EndpointError::validation("bad").save_changes().save_changes();
        assert!(err.wants_save());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(matches!(err.unwrap_save(), EndpointError::Validation(_)));
    }
}
