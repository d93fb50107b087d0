//! axum glue: mounts endpoint definitions as HTTP resources.

pub mod response;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, MethodRouter};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::{AuthError, AuthenticationTable, AuthenticatorRegistry};
use crate::config::AppConfig;
use crate::endpoint::{
    EndpointBinder, EndpointDefinition, EndpointError, EndpointPipeline, EndpointRequest, EndpointResponse,
    MemoryRateLimitStore, RateLimitStore,
};
use crate::error::ApiError;
use crate::filter::{FilterEngine, FilterError, FilterRegistry};
use crate::tasks::{TaskExecutor, TaskQueue, TaskRegistry};

pub const ENDPOINT_ADAPTER: &str = "endpoint";

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Unsupported resource adapter: {0}")]
    UnsupportedAdapter(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Services shared by every mounted resource.
pub struct EndpointRuntime {
    pipeline: EndpointPipeline,
    authentication: AuthenticationTable,
    rate_limiter: Arc<dyn RateLimitStore>,
    display_errors: bool,
}

impl EndpointRuntime {
    pub fn new(pipeline: EndpointPipeline, authentication: AuthenticationTable) -> Self {
        Self {
            pipeline,
            authentication,
            rate_limiter: Arc::new(MemoryRateLimitStore::new()),
            display_errors: false,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        filters: &FilterRegistry,
        authenticators: &AuthenticatorRegistry,
        queue: Arc<dyn TaskQueue>,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, AdapterError> {
        if config.api.resource_adapter != ENDPOINT_ADAPTER {
            return Err(AdapterError::UnsupportedAdapter(config.api.resource_adapter.clone()));
        }

        let executor = TaskExecutor::new(config.tasks.clone(), queue, registry);
        let filters = FilterEngine::from_config(&config.filter, filters)?;
        let authentication = AuthenticationTable::from_config(&config.auth, authenticators)?;

        Ok(Self::new(EndpointPipeline::new(executor, filters), authentication)
            .with_display_errors(config.api.display_errors))
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_display_errors(mut self, display_errors: bool) -> Self {
        self.display_errors = display_errors;
        self
    }

    pub fn pipeline(&self) -> &EndpointPipeline {
        &self.pipeline
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// One URL pattern with candidate definitions per HTTP method.
pub struct EndpointResource {
    runtime: Arc<EndpointRuntime>,
    handlers: Vec<(Method, EndpointBinder)>,
    allow_anonymous: bool,
}

impl EndpointResource {
    pub fn new(runtime: Arc<EndpointRuntime>) -> Self {
        Self {
            runtime,
            handlers: Vec::new(),
            allow_anonymous: false,
        }
    }

    pub fn method(mut self, method: Method, candidates: Vec<Arc<dyn EndpointDefinition>>) -> Self {
        let binder = EndpointBinder::new(candidates, self.runtime.rate_limiter.clone());
        self.handlers.retain(|(m, _)| *m != method);
        self.handlers.push((method, binder));
        self
    }

    pub fn get(self, candidates: Vec<Arc<dyn EndpointDefinition>>) -> Self {
        self.method(Method::GET, candidates)
    }

    pub fn post(self, candidates: Vec<Arc<dyn EndpointDefinition>>) -> Self {
        self.method(Method::POST, candidates)
    }

    pub fn put(self, candidates: Vec<Arc<dyn EndpointDefinition>>) -> Self {
        self.method(Method::PUT, candidates)
    }

    pub fn patch(self, candidates: Vec<Arc<dyn EndpointDefinition>>) -> Self {
        self.method(Method::PATCH, candidates)
    }

    pub fn delete(self, candidates: Vec<Arc<dyn EndpointDefinition>>) -> Self {
        self.method(Method::DELETE, candidates)
    }

    /// Proceed without a consumer when authentication fails.
    pub fn allow_anonymous(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }

    /// Register deferred tasks with the runtime's task registry.
    pub fn build(self) -> Arc<Self> {
        let registry = self.runtime.pipeline.executor().registry();
        for (_, binder) in &self.handlers {
            for definition in binder.candidates() {
                registry.register_schema(&definition.schema());
            }
        }
        Arc::new(self)
    }

    pub fn allowed_methods(&self) -> Vec<Method> {
        self.handlers.iter().map(|(m, _)| m.clone()).collect()
    }

    pub async fn handle(&self, mut request: EndpointRequest) -> Result<EndpointResponse, ApiError> {
        let display_errors = self.runtime.display_errors;
        let to_api = |err: EndpointError| ApiError::from_endpoint(err, display_errors);

        let Some((_, binder)) = self.handlers.iter().find(|(m, _)| m == request.method()) else {
            return Err(ApiError::method_not_allowed(self.allowed_methods()));
        };

        match self.runtime.authentication.authenticate(&request).await {
            Ok(consumer) => request.set_consumer(consumer),
            Err(err) if self.allow_anonymous => {
                tracing::debug!("Continuing anonymously: {}", err);
                request.set_consumer(None);
            }
            Err(err) => return Err(to_api(err)),
        }

        let bound = binder.bind(Arc::new(request)).await.map_err(to_api)?;
        self.runtime.pipeline.process(bound).await.map_err(to_api)
    }

    pub fn method_router(self: Arc<Self>) -> MethodRouter {
        any(dispatch).with_state(self)
    }

    pub fn documentation(&self) -> Value {
        let methods: serde_json::Map<String, Value> = self
            .handlers
            .iter()
            .map(|(method, binder)| {
                let candidates: Vec<Value> = binder.candidates().iter().map(|d| d.documentation()).collect();
                (method.to_string(), Value::Array(candidates))
            })
            .collect();
        json!({
            "allow_anonymous": self.allow_anonymous,
            "methods": methods,
        })
    }
}

async fn dispatch(
    State(resource): State<Arc<EndpointResource>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path: Option<Path<HashMap<String, String>>>,
    body: Bytes,
) -> Response {
    let path_params = path.map(|Path(params)| params).unwrap_or_default();
    let request = match EndpointRequest::from_parts(method, uri.path(), uri.query(), headers, path_params, &body) {
        Ok(request) => request,
        Err(err) => return ApiError::from(err).into_response(),
    };

    match resource.handle(request).await {
        Ok(response) => response.into_response(),
        Err(err) => err.into_response(),
    }
}
