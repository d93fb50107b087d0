// HTTP API Error Types
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::endpoint::{codes, EndpointError};

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug, Clone)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest {
        code: u16,
        message: String,
        details: Option<Value>,
    },

    // 401 Unauthorized
    Unauthorized {
        message: String,
        challenge: Option<String>,
    },

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 405 Method Not Allowed
    MethodNotAllowed { allowed: Vec<Method> },

    // 422 Unprocessable Entity
    UnprocessableEntity(String),

    // 429 Too Many Requests
    TooManyRequests(String),

    // No candidate matched; status is shared by every rejection, else 400
    NoMatch {
        status: StatusCode,
        message: String,
        candidates: Vec<Value>,
    },

    // 500 Internal Server Error; the reference is logged with the cause
    InternalServerError { reference: Uuid, detail: Option<String> },

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NoMatch { status, .. } => *status,
            ApiError::InternalServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Numeric code for client handling
    pub fn error_code(&self) -> u16 {
        match self {
            ApiError::BadRequest { code, .. } => *code,
            ApiError::Unauthorized { .. } => codes::AUTHORIZATION_FAILURE,
            ApiError::Forbidden(_) => codes::FORBIDDEN,
            ApiError::NotFound(_) => codes::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => codes::METHOD_NOT_ALLOWED,
            ApiError::UnprocessableEntity(_) => codes::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests(_) => codes::REQUEST_THROTTLED,
            ApiError::NoMatch { .. } => codes::BAD_REQUEST,
            ApiError::InternalServerError { .. } => codes::SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest { message, .. }
            | ApiError::Unauthorized { message, .. }
            | ApiError::Forbidden(message)
            | ApiError::NotFound(message)
            | ApiError::UnprocessableEntity(message)
            | ApiError::TooManyRequests(message)
            | ApiError::NoMatch { message, .. }
            | ApiError::ServiceUnavailable(message) => message.clone(),
            ApiError::MethodNotAllowed { allowed } => format!(
                "Method not allowed; expected one of: {}",
                allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ")
            ),
            ApiError::InternalServerError { reference, .. } => format!("Server Error: Reference {}", reference),
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error_code": self.error_code(),
            "error_message": self.message(),
        });

        match self {
            ApiError::BadRequest {
                details: Some(Value::Object(extra)),
                ..
            } => {
                for (key, value) in extra {
                    body[key.as_str()] = value.clone();
                }
            }
            ApiError::NoMatch { candidates, .. } => {
                body["candidates"] = json!(candidates);
            }
            ApiError::InternalServerError {
                detail: Some(detail), ..
            } => {
                body["detail"] = json!(detail);
            }
            _ => {}
        }
        body
    }

    /// Convert an endpoint error. `display_errors` exposes server error causes.
    pub fn from_endpoint(err: EndpointError, display_errors: bool) -> Self {
        let message = err.to_string();
        let with_detail = |base: &str| match err.detail() {
            Some(detail) => format!("{}: {}", base, detail),
            None => base.to_string(),
        };

        match &err {
            EndpointError::MissingFields { .. } | EndpointError::InvalidFieldValues { .. } => ApiError::BadRequest {
                code: err.error_code(),
                message: with_detail(&message),
                details: None,
            },
            EndpointError::Validation(_) | EndpointError::MalformedBody(_) => ApiError::BadRequest {
                code: err.error_code(),
                message,
                details: None,
            },
            EndpointError::Unauthenticated { challenge, .. } => ApiError::Unauthorized {
                message: with_detail(&message),
                challenge: challenge.clone(),
            },
            EndpointError::Forbidden { .. } => ApiError::Forbidden(with_detail(&message)),
            EndpointError::NotFound(_) => ApiError::NotFound(message),
            EndpointError::UnexpectedFields(_) => {
                ApiError::UnprocessableEntity(format!("Unprocessable Entity : {}", message))
            }
            EndpointError::RateLimited { .. } => ApiError::TooManyRequests(message),
            EndpointError::NoMatch { rejections } => {
                let candidates: Vec<Value> = rejections
                    .iter()
                    .map(|r| {
                        json!({
                            "endpoint": r.endpoint,
                            "error_code": r.error.error_code(),
                            "error_message": r.error.to_string(),
                        })
                    })
                    .collect();
                ApiError::NoMatch {
                    status: err.status_code(),
                    message,
                    candidates,
                }
            }
            EndpointError::SaveChanges(inner) => ApiError::from_endpoint((**inner).clone(), display_errors),
            EndpointError::TaskFailed { .. } | EndpointError::NotImplemented { .. } | EndpointError::Internal(_) => {
                let reference = Uuid::new_v4();
                tracing::error!("Server error {}: {}", reference, message);
                ApiError::InternalServerError {
                    reference,
                    detail: display_errors.then_some(message),
                }
            }
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code: codes::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            message: message.into(),
            challenge: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn method_not_allowed(allowed: Vec<Method>) -> Self {
        ApiError::MethodNotAllowed { allowed }
    }

    pub fn internal_server_error(detail: impl Into<String>) -> Self {
        let reference = Uuid::new_v4();
        let detail = detail.into();
        tracing::error!("Server error {}: {}", reference, detail);
        ApiError::InternalServerError {
            reference,
            detail: None,
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<EndpointError> for ApiError {
    fn from(err: EndpointError) -> Self {
        ApiError::from_endpoint(err, false)
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if self.status_code().is_client_error() {
            tracing::warn!("Client error {}: {}", self.error_code(), self.message());
        }

        let mut response = (self.status_code(), Json(self.to_json())).into_response();
        match &self {
            ApiError::Unauthorized {
                challenge: Some(challenge),
                ..
            } => {
                if let Ok(value) = HeaderValue::from_str(challenge) {
                    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
            }
            ApiError::MethodNotAllowed { allowed } => {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
            }
            _ => {}
        }
        response
    }
}
